//! Unit catalog: job names to executable units.
//!
//! ```json
//! {
//!   "units": {
//!     "acres99":  { "program": "./run_worker.sh", "args": ["acres99"], "env": { "HARVEST_SUBTASKS_FILE": "cities.txt" } },
//!     "proptiger": { "program": "harvest-worker", "working_dir": "scrapers/proptiger" }
//!   }
//! }
//! ```
//!
//! Relative working directories resolve against the catalog file's directory,
//! and resolved paths are absolute so they survive the spawn's change of
//! directory. A program written as a path (it contains a separator) resolves
//! against the unit's working directory and must exist; a bare program name is
//! looked up on `PATH` at spawn time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::CatalogError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl UnitSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    units: BTreeMap<String, UnitSpec>,
}

/// A unit ready to spawn.
#[derive(Debug, Clone)]
pub struct ResolvedUnit {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct UnitCatalog {
    units: BTreeMap<String, UnitSpec>,
    base_dir: PathBuf,
}

impl UnitCatalog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            units: BTreeMap::new(),
            base_dir: base_dir.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_json(&raw, base_dir).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str, base_dir: impl Into<PathBuf>) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        let mut catalog = Self::new(base_dir);
        for (name, spec) in file.units {
            catalog = catalog.with_unit(name, spec);
        }
        Ok(catalog)
    }

    pub fn with_unit(mut self, name: impl AsRef<str>, spec: UnitSpec) -> Self {
        self.units.insert(name.as_ref().to_lowercase(), spec);
        self
    }

    /// Unit names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Resolve a job name (case-insensitive) to an executable unit.
    pub fn resolve(&self, name: &str) -> Result<ResolvedUnit, CatalogError> {
        let key = name.trim().to_lowercase();
        let spec = self
            .units
            .get(&key)
            .ok_or_else(|| CatalogError::UnknownUnit(name.to_string()))?;

        let working_dir = match &spec.working_dir {
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        };
        let working_dir = std::path::absolute(&working_dir).unwrap_or(working_dir);
        if !working_dir.is_dir() {
            return Err(CatalogError::MissingWorkingDir {
                unit: key,
                path: working_dir,
            });
        }

        let program = if spec.program.components().count() > 1 {
            let program = working_dir.join(&spec.program);
            if !program.exists() {
                return Err(CatalogError::MissingProgram { unit: key, path: program });
            }
            program
        } else {
            spec.program.clone()
        };

        Ok(ResolvedUnit {
            name: key,
            program,
            args: spec.args.clone(),
            working_dir,
            env: spec.env.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "units": {
            "Acres99": { "program": "./run.sh", "args": ["acres99"], "env": { "HARVEST_RESTART_AFTER": "10" } },
            "proptiger": { "program": "harvest-worker", "working_dir": "proptiger" },
            "magicbricks": { "program": "./missing.sh" },
            "housing": { "program": "sh", "working_dir": "nowhere" }
        }
    }"#;

    fn catalog(dir: &Path) -> UnitCatalog {
        std::fs::write(dir.join("run.sh"), "#!/bin/sh\n").unwrap();
        std::fs::create_dir(dir.join("proptiger")).unwrap();
        let path = dir.join("units.json");
        std::fs::write(&path, CATALOG).unwrap();
        UnitCatalog::load(&path).unwrap()
    }

    #[test]
    fn test_names_are_lowercase_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        assert_eq!(catalog.names(), vec!["acres99", "housing", "magicbricks", "proptiger"]);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let unit = catalog(dir.path()).resolve("ACRES99").unwrap();

        assert_eq!(unit.name, "acres99");
        assert_eq!(unit.program, dir.path().join("./run.sh"));
        assert_eq!(unit.args, vec!["acres99"]);
        assert_eq!(unit.env.get("HARVEST_RESTART_AFTER").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_bare_program_is_left_for_path_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let unit = catalog(dir.path()).resolve("proptiger").unwrap();

        assert_eq!(unit.program, PathBuf::from("harvest-worker"));
        assert_eq!(unit.working_dir, dir.path().join("proptiger"));
    }

    #[test]
    fn test_unresolvable_units() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());

        assert!(matches!(catalog.resolve("unknown-unit"), Err(CatalogError::UnknownUnit(_))));
        assert!(matches!(catalog.resolve("magicbricks"), Err(CatalogError::MissingProgram { .. })));
        assert!(matches!(catalog.resolve("housing"), Err(CatalogError::MissingWorkingDir { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_catalog_path_spawns_from_working_dir() {
        // Cargo runs tests from the package directory, so a directory created
        // here can be named relative to the current directory.
        let dir = tempfile::tempdir_in(".").unwrap();
        let scrapers = dir.path().join("scrapers");
        std::fs::create_dir(&scrapers).unwrap();
        let script = scrapers.join("run.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::write(
            dir.path().join("units.json"),
            r#"{"units":{"acres99":{"program":"./run.sh","working_dir":"scrapers"}}}"#,
        )
        .unwrap();

        let relative = Path::new(dir.path().file_name().unwrap()).join("units.json");
        assert!(relative.is_relative());
        let unit = UnitCatalog::load(&relative).unwrap().resolve("acres99").unwrap();

        assert!(unit.working_dir.is_absolute());
        assert!(unit.program.is_absolute());
        let status = std::process::Command::new("/bin/sh")
            .arg(&unit.program)
            .current_dir(&unit.working_dir)
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_malformed_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.json");
        std::fs::write(&path, "{ \"units\": [] }").unwrap();

        assert!(matches!(UnitCatalog::load(&path), Err(CatalogError::Parse { .. })));
        assert!(matches!(
            UnitCatalog::load(&dir.path().join("absent.json")),
            Err(CatalogError::Io { .. })
        ));
    }
}
