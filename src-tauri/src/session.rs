//! Session state for the try-on page and the controller that owns it.
//!
//! The controller is the only writer of [`SessionState`]. The page reads it
//! through [`SessionView`] snapshots returned by every mutation.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::assets::{encode_asset, EncodedImage, ImageAsset};
use crate::error::{EditError, ErrorKind};
use crate::gemini::ImageEditor;
use crate::utils::now_iso;

pub const MISSING_INPUT_MESSAGE: &str =
    "Por favor, carregue uma imagem e insira um comando de edição.";

/// Filled in when a garment is selected and the user has not typed anything.
pub const DEFAULT_GARMENT_INSTRUCTION: &str = "Vista a pessoa da primeira imagem com a peça de roupa da segunda imagem, mantendo o rosto, a pose e o fundo originais.";

pub type EditResult = Result<EncodedImage, EditError>;

#[derive(Debug, Clone)]
pub enum Outcome {
    Image(EncodedImage),
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub primary: Option<ImageAsset>,
    pub garment: Option<ImageAsset>,
    pub instruction: String,
    /// The instruction is the garment default, not user text.
    instruction_is_default: bool,
    pub pending: bool,
    pub outcome: Option<Outcome>,
    pub completed_at: Option<String>,
    /// Bumped whenever an image or the instruction changes; a submission
    /// whose inputs changed underneath it does not publish its result.
    generation: u64,
}

impl SessionState {
    fn clear_outcome(&mut self) {
        self.outcome = None;
        self.completed_at = None;
    }

    fn record(&mut self, result: &EditResult) {
        self.outcome = Some(match result {
            Ok(image) => Outcome::Image(image.clone()),
            Err(e) => Outcome::Failed {
                kind: e.kind(),
                message: e.user_message(),
            },
        });
        self.completed_at = Some(now_iso());
    }

    fn can_submit(&self) -> bool {
        !self.pending && self.primary.is_some() && !self.instruction.trim().is_empty()
    }
}

/// What the page renders.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub primary_preview: Option<String>,
    pub garment_preview: Option<String>,
    pub instruction: String,
    pub pending: bool,
    pub can_submit: bool,
    /// `data:` URL of the edited image.
    pub result_image: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub completed_at: Option<String>,
}

impl From<&SessionState> for SessionView {
    fn from(st: &SessionState) -> Self {
        let (result_image, error, error_kind) = match &st.outcome {
            Some(Outcome::Image(img)) => (Some(img.data_url()), None, None),
            Some(Outcome::Failed { kind, message }) => (None, Some(message.clone()), Some(*kind)),
            None => (None, None, None),
        };
        Self {
            primary_preview: st.primary.as_ref().and_then(ImageAsset::preview),
            garment_preview: st.garment.as_ref().and_then(ImageAsset::preview),
            instruction: st.instruction.clone(),
            pending: st.pending,
            can_submit: st.can_submit(),
            result_image,
            error,
            error_kind,
            completed_at: st.completed_at.clone(),
        }
    }
}

/// Clears `pending` when a submission ends, including when its future is
/// dropped or the editor panics.
struct PendingGuard<'a> {
    state: &'a Mutex<SessionState>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.pending = false;
    }
}

pub struct SessionController<E> {
    editor: E,
    state: Mutex<SessionState>,
}

impl<E: ImageEditor> SessionController<E> {
    pub fn new(editor: E) -> Self {
        Self {
            editor,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionView {
        SessionView::from(&*self.lock())
    }

    /// Last successful edit, if the page is showing one.
    pub fn result_image(&self) -> Option<EncodedImage> {
        match &self.lock().outcome {
            Some(Outcome::Image(img)) => Some(img.clone()),
            _ => None,
        }
    }

    pub fn set_primary_image(&self, asset: ImageAsset) -> SessionView {
        let mut st = self.lock();
        debug!(mime_type = %asset.mime_type, "primary image selected");
        st.primary = Some(asset);
        st.generation += 1;
        st.clear_outcome();
        SessionView::from(&*st)
    }

    pub fn set_garment_image(&self, asset: ImageAsset) -> SessionView {
        let mut st = self.lock();
        debug!(mime_type = %asset.mime_type, "garment image selected");
        st.garment = Some(asset);
        st.generation += 1;
        st.clear_outcome();
        if st.instruction.trim().is_empty() || st.instruction_is_default {
            st.instruction = DEFAULT_GARMENT_INSTRUCTION.to_string();
            st.instruction_is_default = true;
        }
        SessionView::from(&*st)
    }

    pub fn clear_garment_image(&self) -> SessionView {
        let mut st = self.lock();
        if st.garment.take().is_some() {
            st.generation += 1;
            st.clear_outcome();
        }
        if st.instruction_is_default {
            st.instruction.clear();
            st.instruction_is_default = false;
        }
        SessionView::from(&*st)
    }

    pub fn set_instruction(&self, text: impl Into<String>) -> SessionView {
        let mut st = self.lock();
        let text = text.into();
        if text != st.instruction {
            st.generation += 1;
        }
        st.instruction = text;
        st.instruction_is_default = st.instruction == DEFAULT_GARMENT_INSTRUCTION;
        SessionView::from(&*st)
    }

    /// Runs one edit. Returns `None` without touching state when another
    /// submission is still pending.
    #[instrument(skip(self), fields(submission = %Uuid::new_v4()))]
    pub async fn submit(&self) -> Option<EditResult> {
        let (primary, garment, instruction, generation) = {
            let mut st = self.lock();
            if st.pending {
                debug!("submit ignored, a submission is already pending");
                return None;
            }
            let primary = match (&st.primary, st.instruction.trim().is_empty()) {
                (Some(primary), false) => primary.clone(),
                _ => {
                    let result = Err(EditError::Validation(MISSING_INPUT_MESSAGE.to_string()));
                    st.record(&result);
                    return Some(result);
                }
            };
            st.pending = true;
            st.clear_outcome();
            (primary, st.garment.clone(), st.instruction.clone(), st.generation)
        };

        let _pending = PendingGuard { state: &self.state };

        info!(garment = garment.is_some(), "submitting edit");
        let result = self.run(&primary, &instruction, garment.as_ref()).await;

        let mut st = self.lock();
        st.pending = false;
        if st.generation == generation {
            st.record(&result);
        } else {
            warn!("inputs changed while pending, result discarded");
        }
        match &result {
            Ok(_) => info!("edit completed"),
            Err(e) => warn!(error = %e, "edit failed"),
        }
        Some(result)
    }

    async fn run(
        &self,
        primary: &ImageAsset,
        instruction: &str,
        garment: Option<&ImageAsset>,
    ) -> EditResult {
        let primary = encode_asset(primary).await?;
        let garment = match garment {
            Some(g) => Some(encode_asset(g).await?),
            None => None,
        };
        self.editor
            .edit_image(&primary, instruction, garment.as_ref())
            .await
    }
}
