//! Game metadata lookup in EmulationStation `gamelist.xml` files.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};
use crate::pattern::Placeholder;

/// Metadata for one game, as stored in a gamelist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Game {
    /// Path to the rom. Absolute once resolved.
    pub path: String,
    pub title: String,
    pub overview: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thumbnail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub release_date: String,
    pub developer: String,
    pub publisher: String,
    pub genre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<i64>,
}

impl Game {
    /// A record carrying only the launched rom, used when no metadata exists.
    pub fn fallback(rom: &str) -> Self {
        Self {
            path: rom.to_string(),
            ..Self::default()
        }
    }

    /// The title if known, otherwise the rom's file name.
    pub fn display_title(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        base_name(&self.path).to_string()
    }
}

/// `<folder>` entries may be interleaved with the `<game>` ones.
#[derive(Debug, Deserialize)]
struct GameListXml {
    #[serde(rename = "game", default)]
    games: Vec<GameXml>,
}

/// Raw `<game>` element. Everything is read as text so that a blank or
/// odd `<rating>` does not reject the whole file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GameXml {
    path: String,
    name: String,
    desc: String,
    image: String,
    thumbnail: String,
    rating: String,
    releasedate: String,
    developer: String,
    publisher: String,
    genre: String,
    players: String,
}

impl GameXml {
    fn into_game(self, base_dir: &Path) -> Game {
        Game {
            path: resolve(base_dir, self.path),
            title: self.name,
            overview: self.desc,
            image: resolve(base_dir, self.image),
            thumbnail: resolve(base_dir, self.thumbnail),
            rating: self.rating.trim().parse().ok(),
            release_date: self.releasedate,
            developer: self.developer,
            publisher: self.publisher,
            genre: self.genre,
            players: self.players.trim().parse().ok(),
        }
    }
}

/// Looks up `rom` in the gamelist at `gamelist`.
///
/// Entries are matched on file name. Commands launched with `%BASENAME%`
/// carry no extension, so in that mode extensions are ignored.
pub fn lookup(gamelist: Option<&Path>, rom: &str, placeholder: Option<Placeholder>) -> Result<Game> {
    let gamelist = gamelist.ok_or(WatchError::NoCatalog)?;
    let parse_error = |reason: String| WatchError::CatalogParse {
        path: gamelist.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(gamelist).map_err(|e| parse_error(e.to_string()))?;
    let list: GameListXml = quick_xml::de::from_str(&content).map_err(|e| parse_error(e.to_string()))?;

    let by_basename = placeholder == Some(Placeholder::Basename);
    let wanted = base_name(rom);
    let wanted_stem = strip_extension(wanted);

    let entry = list.games.into_iter().find(|g| {
        let stored = base_name(&g.path);
        if by_basename {
            let stored = strip_extension(stored);
            stored == wanted || stored == wanted_stem
        } else {
            stored == wanted
        }
    });

    match entry {
        Some(entry) => {
            let base_dir = gamelist.parent().unwrap_or_else(|| Path::new("/"));
            Ok(entry.into_game(base_dir))
        }
        None => Err(WatchError::NotFound(rom.to_string())),
    }
}

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) => &name[..i],
        None => name,
    }
}

/// Resolves a non-empty relative `field` against `base_dir`.
fn resolve(base_dir: &Path, field: String) -> String {
    if field.is_empty() || Path::new(&field).is_absolute() {
        return field;
    }
    normalize(&base_dir.join(&field)).to_string_lossy().into_owned()
}

/// Lexically collapses `.` and `..` components without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
