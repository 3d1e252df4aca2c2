mod command;
mod kv_store;
mod membership;

pub use command::KvCommand;
pub use kv_store::Applied;
pub use kv_store::KvReader;
pub use kv_store::KvStore;
pub use membership::apply_conf_change;
