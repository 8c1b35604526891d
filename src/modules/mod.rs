pub mod bash;
pub mod browsing;
pub mod commits;
pub mod csv_rows;
pub mod ttt;
pub mod window_watcher;
pub mod zsh;

pub use bash::Bash;
pub use browsing::Browsing;
pub use commits::Commits;
pub use ttt::Ttt;
pub use window_watcher::WindowWatcher;
pub use zsh::Zsh;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::cache::CacheBackend;
use crate::config::Config;
use crate::module::ModuleRegistry;
use crate::types::{ParseError, Res};

/// Register a module for every section present in the config.
pub fn create_registry(config: &Config, store: Arc<dyn CacheBackend>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    if let Some(zsh) = &config.zsh {
        registry.register(Zsh::new(zsh.clone(), Arc::clone(&store)));
    }
    if let Some(bash) = &config.bash {
        registry.register(Bash::new(bash.clone(), Arc::clone(&store)));
    }
    if let Some(ttt) = &config.ttt {
        registry.register(Ttt::new(ttt.clone()));
    }
    if let Some(ww) = &config.window_watcher {
        registry.register(WindowWatcher::new(ww.clone(), Arc::clone(&store)));
    }
    if let Some(commits) = &config.commits {
        registry.register(Commits::new(commits.clone(), Arc::clone(&store)));
    }
    if let Some(browsing) = &config.browsing {
        registry.register(Browsing::new(browsing.clone(), store));
    }
    registry
}

/// Lines of a file decoded as latin-1, which never fails, with the trailing
/// `\r` of CRLF endings removed. Numbered from 1.
///
/// Opening happens immediately; reading is lazy. An I/O error part way
/// through is yielded once and ends the sequence.
pub(crate) fn latin1_lines(path: &Path) -> Res<impl Iterator<Item = (u64, Res<String>)> + use<>> {
    let file = File::open(path).map_err(|e| read_error(path, e))?;
    let owned = path.to_path_buf();
    let mut failed = false;
    Ok(BufReader::new(file)
        .split(b'\n')
        .zip(1u64..)
        .map_while(move |(chunk, line)| {
            if failed {
                return None;
            }
            Some(match chunk {
                Ok(mut bytes) => {
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    (line, Ok(bytes.into_iter().map(char::from).collect()))
                }
                Err(e) => {
                    failed = true;
                    (line, Err(ParseError::new(&owned, Some(line), format!("read failed: {e}"))))
                }
            })
        }))
}

/// Whole file as bytes, or the error item to yield in its place.
pub(crate) fn read_bytes(path: &Path) -> Res<Vec<u8>> {
    std::fs::read(path).map_err(|e| read_error(path, e))
}

pub(crate) fn read_error(path: &Path, e: std::io::Error) -> ParseError {
    ParseError::new(path, None, format!("failed to read: {e}"))
}
