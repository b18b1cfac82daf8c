pub mod codes;
pub mod guards;
pub mod ledger;
pub mod store;
pub mod types;

pub use codes::{
    CODE_ALPHABET, CodeBook, CodeRecord, GROUP_COUNT, GROUP_LEN, is_valid_code, is_valid_prefix,
    normalize, random_code,
};
pub use guards::{Guard, RedeemRequest, redemption_pipeline};
pub use ledger::{Ledger, LedgerConfig};
pub use store::{SNAPSHOT_FILE, SnapshotStore};
pub use types::*;
