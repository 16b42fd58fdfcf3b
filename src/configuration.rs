use std::time::Duration;

pub trait Configuration: Clone + Send + Sync + 'static {
    fn port(&self) -> u16;
    fn database_url(&self) -> Option<String>;
    fn database_pool_size(&self) -> u32;
    fn store_timeout(&self) -> Duration;
    fn validate_students(&self) -> bool;
}
