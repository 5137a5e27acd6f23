//! Virtual try-on: send a photo, an optional garment photo and an edit
//! instruction to Gemini and show the edited image.

pub mod assets;
pub mod error;
pub mod gemini;
pub mod logging;
pub mod session;
pub mod settings;
pub mod utils;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(feature = "desktop")]
pub use commands::run;

pub use assets::{EncodedImage, ImageAsset};
pub use error::EditError;
pub use gemini::{GeminiClient, ImageEditor};
pub use session::{SessionController, SessionView};
