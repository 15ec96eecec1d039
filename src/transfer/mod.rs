pub mod protocol;

pub use protocol::{
    to_lamports, AuthorizationState, SignedTransfer, TransferAuthorization, TransferProtocol,
    EXTERNAL_TRANSFER_TAG, MESSAGE_PREFIX,
};
