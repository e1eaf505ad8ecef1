/// Read-only view of the file namespace, owned elsewhere.
pub trait Namespace: Send + Sync {
    fn block_hashes_for_file(&self, file_hash: &str) -> anyhow::Result<Vec<String>>;
}
