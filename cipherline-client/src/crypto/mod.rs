//! Sealing of persisted key material.
//!
//! The backend owns every protocol primitive; the client only encrypts what it
//! writes to disk so shared keys are not kept in cleartext.

mod device;
mod sealer;

pub use device::load_or_create_device_secret;
pub use sealer::{SealedBlob, Sealer};
