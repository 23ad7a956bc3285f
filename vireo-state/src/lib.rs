//! State storage for the Vireo consensus engine: the layered UTXO view
//! stack, the sled-backed persistent store, the on-disk block and undo
//! files, and the mempool container.

#[macro_use]
extern crate serde;

pub mod block_files;
pub mod disk;
pub mod mempool;
pub mod store;
pub mod view;

pub use block_files::BlockFiles;
pub use disk::{BlockFileInfo, DiskBlockIndex, FlatFilePos};
pub use mempool::Mempool;
pub use store::StoreView;
pub use view::{CachedView, CoinsStats, CoinsView, MempoolView};

use std::path::PathBuf;

/// A boxed [`std::error::Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The height marker given to mempool transactions viewed as coins.
pub const MEMPOOL_HEIGHT: u32 = 0x7FFF_FFFF;

/// Configuration for the state service.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The root directory for storing cached data.
    ///
    /// The UTXO database lives in `<cache_dir>/<net>/coins`, block and undo
    /// files under `<cache_dir>/<net>/blocks`.
    pub cache_dir: PathBuf,

    /// Whether to use an ephemeral, in-memory database.
    ///
    /// Set by tests; nothing is persisted across runs.
    pub ephemeral: bool,
}

impl Config {
    fn net_dir(&self, network: vireo_chain::parameters::Network) -> PathBuf {
        let net_name = match network {
            vireo_chain::parameters::Network::Mainnet => "mainnet",
            vireo_chain::parameters::Network::Testnet => "testnet",
        };
        self.cache_dir.join(net_name)
    }

    /// The path of the coin database for `network`.
    pub fn coins_dir(&self, network: vireo_chain::parameters::Network) -> PathBuf {
        self.net_dir(network).join("coins")
    }

    /// The directory holding `blk?????.dat` and `rev?????.dat` for
    /// `network`.
    pub fn blocks_dir(&self, network: vireo_chain::parameters::Network) -> PathBuf {
        self.net_dir(network).join("blocks")
    }

    /// An ephemeral configuration rooted at `dir`, for tests.
    pub fn ephemeral(dir: PathBuf) -> Config {
        Config {
            cache_dir: dir,
            ephemeral: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap().join("cache"))
            .join("vireo");
        Self {
            cache_dir,
            ephemeral: false,
        }
    }
}
