//! Coffer device core.
//!
//! A sans-IO implementation of a hardware wallet: the whole device is one
//! state machine that consumes HID packets, button edges and clock ticks,
//! and produces outbound packets and display updates. Nothing here touches
//! real hardware; the [`flash::Flash`] and [`entropy::Entropy`] traits and
//! the caller-supplied clock stand in for it, which is also what makes the
//! simulation harness deterministic.
//!
//! The interesting subsystems:
//! - [`storage`]: the versioned, triple-slot, magic-committed flash record;
//! - [`session`]: the in-RAM cache of the derived root and passphrase;
//! - [`pin`]: the scrambled-matrix PIN scheme with exponential backoff;
//! - [`sign`]: the interactive signing engines (Bitcoin-family, Ethereum,
//!   Cosmos) and the exchange-contract validator;
//! - [`upload`]: the bootloader firmware-upload engine;
//! - [`device`]: the dispatcher and top-level mode state machine tying it
//!   all together.

pub mod clock;
pub mod coins;
pub mod confirm;
pub mod device;
pub mod entropy;
pub mod flash;
pub mod pin;
pub mod recovery;
pub mod reset;
pub mod session;
pub mod sign;
pub mod storage;
pub mod upload;

mod error;

pub use clock::DeviceInstant;
pub use coffer_crypto::hdnode::HARDENED;
pub use device::{Device, DeviceAction, DeviceEvent, DeviceMode, Screen};
pub use entropy::{Entropy, OsEntropy};
pub use error::CoreError;
pub use flash::{Flash, MemFlash};
