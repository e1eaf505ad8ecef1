pub const BLOCK_KEY_PREFIX: &str = "block";

pub const REFRESH_NODE_TOPIC: &str = "/topic/refresh-node";

pub const REPLICATE_BLOCK_PATH: &str = "/dfs/block/replicate-to-another-node";
