//! Corpus fixtures and config setup shared by the integration tests.
//! Provider doubles come from `rag_chat_core::testing`.
#![allow(dead_code)]

use rag_chat::config::{parse_config, Config};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const MOBY_DICK: &str = "Moby Dick is a novel by Herman Melville, published in 1851. \
It follows the sailor Ishmael and Captain Ahab's obsessive hunt for the white whale.";

pub const PHOTOSYNTHESIS: &str =
    "Photosynthesis converts light energy into chemical energy in green plants.";

/// Temp dir with `documents/` holding the given files and a config pointing
/// at it. Returns the dir guard, the config, and the config file path.
pub fn setup_env(files: &[(&str, &str)], extra_toml: &str) -> (TempDir, Config, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let docs = root.join("documents");
    fs::create_dir_all(&docs).unwrap();
    for (name, text) in files {
        fs::write(docs.join(name), text).unwrap();
    }

    let content = format!(
        r#"[store]
root = "{root}/db"
name = "chroma_db"

[corpus]
path = "{root}/documents"

[chunking]
chunk_size = 200
chunk_overlap = 40

[embedding]
provider = "disabled"

[server]
bind = "127.0.0.1:0"
{extra}
"#,
        root = toml_path(root),
        extra = extra_toml
    );
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("ragchat.toml");
    fs::write(&config_path, &content).unwrap();

    (tmp, parse_config(&content).unwrap(), config_path)
}

/// Path formatted for a TOML basic string.
fn toml_path(p: &Path) -> String {
    p.display().to_string().replace('\\', "/")
}
