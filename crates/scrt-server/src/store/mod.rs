pub mod crypto;
pub mod db;
pub mod model;
pub mod settings;
pub mod stats;

pub use db::Store;
pub use model::{NewSecret, RevealedSecret, SecretRecord, SecretType};
pub use settings::UserSettings;
pub use stats::Stats;
