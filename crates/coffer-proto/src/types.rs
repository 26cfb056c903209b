//! Message type registry.
//!
//! Every wire message carries a 16-bit type code in its first packet. The
//! codes are stable wire constants; reordering this enum must not change
//! them, so each variant pins its discriminant explicitly.

/// How a message's payload is delivered to the device core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Reassembled into a buffer, decoded, then dispatched once.
    Normal,
    /// Segments stream to the handler as they arrive, undecoded.
    Raw,
    /// Normal delivery, but only compiled in with the `debug-link` feature.
    Debug,
}

/// Direction of a message relative to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Host to device.
    In,
    /// Device to host.
    Out,
}

macro_rules! message_types {
    ($( $name:ident = $code:expr, $class:ident, $dir:ident; )*) => {
        /// Wire type code of every known message.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        #[allow(missing_docs)]
        pub enum MessageType {
            $( $name = $code, )*
        }

        impl MessageType {
            /// Parse a wire code. `None` if unrecognized.
            #[must_use]
            pub fn from_u16(code: u16) -> Option<Self> {
                $(
                    if code == $code {
                        return Some(Self::$name);
                    }
                )*
                None
            }

            /// Wire code for this type.
            #[must_use]
            pub fn to_u16(self) -> u16 {
                self as u16
            }

            /// Delivery class for this type.
            #[must_use]
            pub fn class(self) -> MessageClass {
                match self {
                    $( Self::$name => MessageClass::$class, )*
                }
            }

            /// Direction relative to the device.
            #[must_use]
            pub fn direction(self) -> MessageDirection {
                match self {
                    $( Self::$name => MessageDirection::$dir, )*
                }
            }
        }
    };
}

message_types! {
    Initialize = 0, Normal, In;
    Ping = 1, Normal, In;
    Success = 2, Normal, Out;
    Failure = 3, Normal, Out;
    ChangePin = 4, Normal, In;
    WipeDevice = 5, Normal, In;
    FirmwareErase = 6, Normal, In;
    FirmwareUpload = 7, Raw, In;
    GetEntropy = 9, Normal, In;
    Entropy = 10, Normal, Out;
    GetPublicKey = 11, Normal, In;
    PublicKey = 12, Normal, Out;
    LoadDevice = 13, Normal, In;
    ResetDevice = 14, Normal, In;
    SignTx = 15, Normal, In;
    Features = 17, Normal, Out;
    PinMatrixRequest = 18, Normal, Out;
    PinMatrixAck = 19, Normal, In;
    Cancel = 20, Normal, In;
    TxRequest = 21, Normal, Out;
    TxAck = 22, Normal, In;
    CipherKeyValue = 23, Normal, In;
    ClearSession = 24, Normal, In;
    ApplySettings = 25, Normal, In;
    ButtonRequest = 26, Normal, Out;
    ButtonAck = 27, Normal, In;
    GetAddress = 29, Normal, In;
    Address = 30, Normal, Out;
    EntropyRequest = 35, Normal, Out;
    EntropyAck = 36, Normal, In;
    SignMessage = 38, Normal, In;
    VerifyMessage = 39, Normal, In;
    MessageSignature = 40, Normal, Out;
    PassphraseRequest = 41, Normal, Out;
    PassphraseAck = 42, Normal, In;
    EstimateTxSize = 43, Normal, In;
    TxSize = 44, Normal, Out;
    RecoveryDevice = 45, Normal, In;
    WordRequest = 46, Normal, Out;
    WordAck = 47, Normal, In;
    CipheredKeyValue = 48, Normal, Out;
    EncryptMessage = 49, Normal, In;
    EncryptedMessage = 50, Normal, Out;
    DecryptMessage = 51, Normal, In;
    DecryptedMessage = 52, Normal, Out;
    EthereumGetAddress = 56, Normal, In;
    EthereumAddress = 57, Normal, Out;
    EthereumSignTx = 58, Normal, In;
    EthereumTxRequest = 59, Normal, Out;
    EthereumTxAck = 60, Normal, In;
    EthereumSignMessage = 64, Normal, In;
    EthereumVerifyMessage = 65, Normal, In;
    EthereumMessageSignature = 66, Normal, Out;
    CharacterRequest = 80, Normal, Out;
    CharacterAck = 81, Normal, In;
    CharacterDeleteAck = 82, Normal, In;
    CharacterFinalAck = 83, Normal, In;
    CosmosSignTx = 160, Normal, In;
    CosmosTxRequest = 161, Normal, Out;
    CosmosTxAck = 162, Normal, In;
    CosmosSignedTx = 163, Normal, Out;
    DebugLinkDecision = 100, Debug, In;
    DebugLinkGetState = 101, Debug, In;
    DebugLinkState = 102, Debug, Out;
    DebugLinkStop = 103, Debug, In;
    DebugLinkFillConfig = 104, Debug, In;
}
