mod address;
mod hash;

pub use address::{Address, ADDRESS_SIZE};
pub use hash::{hash, hash_pair, Hash, HASH_SIZE};
