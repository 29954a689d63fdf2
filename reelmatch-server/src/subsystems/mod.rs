pub mod embed_sync;
pub mod maintenance;
pub mod similarity;

#[cfg(test)]
pub(crate) mod test_support;
