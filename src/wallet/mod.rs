// Wallet: keys, pools and send construction

mod keystore;
#[allow(clippy::module_inception)]
mod wallet;

pub use keystore::{Address, KeyPair};
pub use wallet::{BlockType, PoolName, Wallet, WalletError, WalletEventListener};
