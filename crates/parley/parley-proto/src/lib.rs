mod codec;
mod error;

pub use codec::{ChatLine, Frame, SERVER_USER};
pub use error::ProtoError;
