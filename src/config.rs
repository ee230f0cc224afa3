//! Build config file: types, defaulting, validation and instruction resolution.
//!
//! A config looks like this:
//!
//! ```yaml
//! apiVersion: v1alpha1
//! kind: ImagineBuildConfig
//! spec:
//!   name: my-image
//!   dir: images/my-image
//!   args: { BASE: alpine }
//!   variants:
//!     - name: debug
//!       with: { args: { DEBUG: "1" }, test: true }
//! ```
//!
//! Spec-level instructions double as defaults for every variant. The merge is
//! done by [`WithBuildInstructions::resolve`], which produces a
//! [`ResolvedInstructions`] with every field filled in.

use anyhow::{Context, Result};
use base64::Engine;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::ConfigError;
use crate::tag::TagMode;

pub const API_VERSION: &str = "v1alpha1";
pub const BUILD_CONFIG_KIND: &str = "ImagineBuildConfig";
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const SECRET_TYPE_FILE: &str = "file";

/// Label keys starting with this are written by imagine and cannot be set by users.
pub const RESERVED_LABEL_PREFIX: &str = "com.github.errordeveloper.imagine.";

/// Variant token used for the index target's tag.
pub const INDEX_VARIANT_NAME: &str = "index";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub spec: BuildSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag_mode: String,

    #[serde(flatten)]
    pub with: WithBuildInstructions,

    #[serde(default)]
    pub variants: Vec<BuildVariant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildVariant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub with: Option<WithBuildInstructions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithBuildInstructions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<Dockerfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untagged: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dockerfile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub body: String,
}

/// Fully defaulted instruction set; what the manifest assembler consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInstructions {
    pub dir: String,
    pub dockerfile: Dockerfile,
    pub args: BTreeMap<String, String>,
    pub test: bool,
    pub secrets: Vec<Secret>,
    pub target: Option<String>,
    pub untagged: bool,
    pub labels: BTreeMap<String, String>,
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={},type={},source={}", self.id, self.kind, self.source)
    }
}

impl Dockerfile {
    fn is_unset(&self) -> bool {
        self.path.is_empty() && self.body.is_empty()
    }
}

/// Reads, defaults and validates a config file.
///
/// Returns the parsed config and the raw file bytes, base64-encoded, for the
/// build-config label.
pub fn load(path: &Path) -> Result<(BuildConfig, String)> {
    let data = fs::read(path).with_context(|| format!("unable to open config file {:?}", path))?;

    let mut config: BuildConfig = serde_yaml::from_slice(&data)
        .with_context(|| format!("unable to parse config file {:?}", path))?;

    config.apply_defaults_and_validate()?;
    debug!(
        "Loaded config {:?}: name={:?}, variants={}",
        path,
        config.spec.name,
        config.spec.variants.len()
    );

    Ok((
        config,
        base64::engine::general_purpose::STANDARD.encode(&data),
    ))
}

impl BuildConfig {
    pub fn apply_defaults_and_validate(&mut self) -> Result<(), ConfigError> {
        check_exact(".apiVersion", &self.api_version, API_VERSION)?;
        check_exact(".kind", &self.kind, BUILD_CONFIG_KIND)?;
        self.spec.apply_defaults_and_validate()
    }
}

fn check_exact(field: &str, value: &str, expected: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MustBeSet(field.to_string()));
    }
    if value != expected {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        });
    }
    Ok(())
}

impl BuildSpec {
    pub fn apply_defaults_and_validate(&mut self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MustBeSet(".spec.name".to_string()));
        }

        if self.with.dir.is_none() && self.variants.is_empty() {
            return Err(ConfigError::NoDirOrVariants);
        }

        if self.with.dockerfile.as_ref().map_or(true, Dockerfile::is_unset) {
            self.with.dockerfile = Some(Dockerfile {
                path: DEFAULT_DOCKERFILE.to_string(),
                body: String::new(),
            });
        }

        if self.tag_mode.is_empty() {
            self.tag_mode = TagMode::default().to_string();
        }
        self.tag_mode()?;

        validate_instructions(".spec", &mut self.with)?;

        let mut seen = HashSet::new();
        for (i, variant) in self.variants.iter_mut().enumerate() {
            let p = format!(".spec.variants[{}]", i);
            if variant.name.is_empty() {
                return Err(ConfigError::MustBeSet(format!("{}.name", p)));
            }
            if variant.name == INDEX_VARIANT_NAME {
                return Err(ConfigError::ReservedVariantName {
                    field: format!("{}.name", p),
                    name: variant.name.clone(),
                });
            }
            if !seen.insert(variant.name.clone()) {
                return Err(ConfigError::DuplicateVariant {
                    field: format!("{}.name", p),
                    name: variant.name.clone(),
                });
            }

            if let Some(with) = variant.with.as_mut() {
                if with.dir.is_none() && self.with.dir.is_none() {
                    return Err(ConfigError::MustBeSet(format!("{}.with.dir", p)));
                }
                validate_instructions(&format!("{}.with", p), with)?;
            } else if self.with.dir.is_none() {
                return Err(ConfigError::MustBeSet(format!("{}.with.dir", p)));
            }
        }

        Ok(())
    }

    pub fn tag_mode(&self) -> Result<TagMode, ConfigError> {
        if self.tag_mode.is_empty() {
            return Ok(TagMode::default());
        }
        self.tag_mode.parse()
    }

    /// Every instruction set that becomes a build, keyed by variant name.
    ///
    /// Without variants this is the single unnamed (`""`) variant built from
    /// spec-level instructions. With variants, spec-level instructions only
    /// serve as defaults and no unnamed variant is produced.
    pub fn resolved_variants(&self) -> Result<Vec<(String, ResolvedInstructions)>, ConfigError> {
        let defaults = WithBuildInstructions::default();
        if self.variants.is_empty() {
            return Ok(vec![(String::new(), self.with.resolve(&defaults, ".spec")?)]);
        }

        self.variants
            .iter()
            .enumerate()
            .map(|(i, variant)| {
                let field = format!(".spec.variants[{}].with", i);
                let resolved = match &variant.with {
                    Some(with) => with.resolve(&self.with, &field)?,
                    None => self.with.resolve(&defaults, &field)?,
                };
                Ok((variant.name.clone(), resolved))
            })
            .collect()
    }
}

fn validate_instructions(p: &str, with: &mut WithBuildInstructions) -> Result<(), ConfigError> {
    if let Some(dockerfile) = &with.dockerfile {
        validate_dockerfile_path(p, &dockerfile.path)?;
    }

    if matches!(with.target.as_deref(), Some("")) {
        return Err(ConfigError::MustBeSet(format!("{}.target", p)));
    }

    for (i, secret) in with.secrets.iter_mut().enumerate() {
        let sp = format!("{}.secrets[{}]", p, i);
        if secret.kind.is_empty() {
            secret.kind = SECRET_TYPE_FILE.to_string();
        }
        if secret.kind != SECRET_TYPE_FILE {
            return Err(ConfigError::UnsupportedSecretType {
                field: format!("{}.type", sp),
                value: secret.kind.clone(),
            });
        }
        if secret.id.is_empty() {
            return Err(ConfigError::MustBeSet(format!("{}.id", sp)));
        }
        if secret.source.is_empty() {
            return Err(ConfigError::MustBeSet(format!("{}.source", sp)));
        }
    }

    if let Some(key) = with
        .labels
        .keys()
        .find(|key| key.starts_with(RESERVED_LABEL_PREFIX))
    {
        return Err(ConfigError::ReservedLabel {
            field: format!("{}.labels", p),
            key: key.clone(),
            prefix: RESERVED_LABEL_PREFIX.to_string(),
        });
    }

    Ok(())
}

fn validate_dockerfile_path(p: &str, path: &str) -> Result<(), ConfigError> {
    if path.is_empty() {
        return Ok(());
    }
    let field = format!("{}.dockerfile.path", p);
    let parsed = Path::new(path);
    if parsed.is_absolute() {
        return Err(ConfigError::AbsoluteDockerfilePath {
            field,
            path: path.to_string(),
        });
    }
    if parsed.components().any(|c| c == Component::ParentDir) {
        return Err(ConfigError::DockerfileOutsideContext {
            field,
            path: path.to_string(),
            body_field: format!("{}.dockerfile.body", p),
        });
    }
    Ok(())
}

impl WithBuildInstructions {
    /// Merges `self` over `base`, copying every unset field from `base`.
    ///
    /// `args` and `labels` merge per key with `self` winning. `field` is the
    /// config path reported if no directory can be resolved.
    pub fn resolve(
        &self,
        base: &WithBuildInstructions,
        field: &str,
    ) -> Result<ResolvedInstructions, ConfigError> {
        let dir = self
            .dir
            .clone()
            .or_else(|| base.dir.clone())
            .ok_or_else(|| ConfigError::MustBeSet(format!("{}.dir", field)))?;

        let dockerfile = match &self.dockerfile {
            Some(dockerfile) if !dockerfile.is_unset() => dockerfile.clone(),
            _ => base
                .dockerfile
                .clone()
                .filter(|dockerfile| !dockerfile.is_unset())
                .unwrap_or_else(|| Dockerfile {
                    path: DEFAULT_DOCKERFILE.to_string(),
                    body: String::new(),
                }),
        };

        let mut args = base.args.clone();
        args.extend(self.args.clone());

        let mut labels = base.labels.clone();
        labels.extend(self.labels.clone());

        let secrets = if self.secrets.is_empty() {
            base.secrets.clone()
        } else {
            self.secrets.clone()
        };

        Ok(ResolvedInstructions {
            dir,
            dockerfile,
            args,
            test: self.test.or(base.test).unwrap_or(false),
            secrets,
            target: self.target.clone().or_else(|| base.target.clone()),
            untagged: self.untagged.or(base.untagged).unwrap_or(false),
            labels,
        })
    }
}

impl ResolvedInstructions {
    pub fn context_path(&self, work_dir: &Path) -> PathBuf {
        clean_join(work_dir, &self.dir)
    }

    /// Absolute dockerfile path, or `None` for inline-only dockerfiles.
    pub fn dockerfile_path(&self, work_dir: &Path) -> Option<PathBuf> {
        if self.dockerfile.path.is_empty() {
            return None;
        }
        Some(clean_join(&self.context_path(work_dir), &self.dockerfile.path))
    }
}

/// Joins `rel` onto `base`, dropping `.` components and empty segments.
pub fn clean_join(base: &Path, rel: &str) -> PathBuf {
    let mut joined = base.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::ParentDir => {
                joined.pop();
            }
            Component::RootDir | Component::Prefix(_) => {
                joined = PathBuf::from(component.as_os_str())
            }
            Component::CurDir => {}
        }
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(yaml: &str) -> BuildConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_basic_sample_defaults() {
        let mut config = parse(
            r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: ./examples/alpine
"#,
        );

        config.apply_defaults_and_validate().unwrap();
        let spec = &config.spec;
        assert_eq!(spec.name, "imagine-alpine-example");
        assert_eq!(spec.with.dir.as_deref(), Some("./examples/alpine"));
        assert!(spec.with.secrets.is_empty());
        assert!(spec.variants.is_empty());
        assert_eq!(spec.tag_mode().unwrap(), TagMode::GitTreeHash);

        let dockerfile = spec.with.dockerfile.as_ref().unwrap();
        assert_eq!(dockerfile.path, "Dockerfile");
        assert!(dockerfile.body.is_empty());

        let resolved = spec.resolved_variants().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "");
        assert!(!resolved[0].1.test);
        assert!(!resolved[0].1.untagged);
    }

    #[test]
    fn test_error_cases() {
        let samples = [
            (
                "'.apiVersion' must be set",
                "kind: ImagineBuildConfig\n",
            ),
            ("'.kind' must be set", "apiVersion: v1alpha1\n"),
            (
                r#"'.apiVersion: "v1alpha"' is not valid, should be '.apiVersion: "v1alpha1"'"#,
                "kind: ImagineBuildConfig\napiVersion: v1alpha\n",
            ),
            (
                "'.spec.name' must be set",
                "kind: ImagineBuildConfig\napiVersion: v1alpha1\n",
            ),
            (
                "at least '.spec.dir' or '.spec.variants' must be set",
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dockerfile: { path: Dockerfile }
"#,
            ),
            (
                r#"absolute path in '.spec.dockerfile.path: "/src/Dockerfile"' is prohibited"#,
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: /src
  dockerfile: { path: /src/Dockerfile }
"#,
            ),
            (
                r#"'.spec.dockerfile.path: "../Dockerfile"' points outside of the context directory - you can try '.spec.dockerfile.body' instead"#,
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  dockerfile: { path: ../Dockerfile }
"#,
            ),
            (
                "'.spec.target' must be set",
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  target: ""
"#,
            ),
            (
                r#"unknown '.spec.tagMode' ("GitBranch")"#,
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  tagMode: GitBranch
"#,
            ),
            (
                r#"unsupported '.spec.secrets[0].type: "env"' - must be "file""#,
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  secrets: [{ id: token, type: env, source: TOKEN }]
"#,
            ),
            (
                "'.spec.secrets[0].source' must be set",
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  secrets: [{ id: token }]
"#,
            ),
            (
                "'.spec.variants[1].name' must be set",
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  variants: [{ name: foo }, { with: { test: true } }]
"#,
            ),
            (
                r#"variant name '.spec.variants[0].name: "index"' is reserved"#,
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  variants: [{ name: index }]
"#,
            ),
            (
                r#"duplicate variant name '.spec.variants[1].name: "foo"'"#,
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  variants: [{ name: foo }, { name: foo }]
"#,
            ),
            (
                "'.spec.variants[0].with.dir' must be set",
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  variants: [{ name: foo, with: { test: true } }]
"#,
            ),
            (
                r#"label '.spec.variants[0].with.labels: "com.github.errordeveloper.imagine.schemaVersion"' uses reserved prefix "com.github.errordeveloper.imagine.""#,
                r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: imagine-alpine-example
  dir: src
  variants:
    - name: foo
      with:
        labels:
          com.github.errordeveloper.imagine.schemaVersion: v2
"#,
            ),
        ];

        for (expected, yaml) in samples {
            let mut config = parse(yaml);
            let err = config
                .apply_defaults_and_validate()
                .expect_err(&format!("expected error for {}", yaml));
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_variant_resolution_inherits_and_merges() {
        let mut config = parse(
            r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: image-1
  dir: examples/image-1
  target: prod
  args: { BASE: alpine, VERSION: "1" }
  labels: { team: infra }
  secrets: [{ id: token, source: .token }]
  variants:
    - name: plain
    - name: debug
      with:
        args: { VERSION: "2", DEBUG: "1" }
        test: true
        untagged: true
        dockerfile: { path: Dockerfile.debug }
    - name: other
      with:
        dir: examples/other
        target: dev
        secrets: [{ id: key, source: .key }]
"#,
        );
        config.apply_defaults_and_validate().unwrap();

        let resolved = config.spec.resolved_variants().unwrap();
        let names: Vec<&str> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["plain", "debug", "other"]);

        let plain = &resolved[0].1;
        assert_eq!(plain.dir, "examples/image-1");
        assert_eq!(plain.dockerfile.path, "Dockerfile");
        assert_eq!(plain.target.as_deref(), Some("prod"));
        assert_eq!(plain.args.get("VERSION").map(String::as_str), Some("1"));
        assert_eq!(plain.secrets[0].to_string(), "id=token,type=file,source=.token");

        let debug = &resolved[1].1;
        assert_eq!(debug.dir, "examples/image-1");
        assert_eq!(debug.dockerfile.path, "Dockerfile.debug");
        assert_eq!(debug.args.get("BASE").map(String::as_str), Some("alpine"));
        assert_eq!(debug.args.get("VERSION").map(String::as_str), Some("2"));
        assert_eq!(debug.args.get("DEBUG").map(String::as_str), Some("1"));
        assert_eq!(debug.labels.get("team").map(String::as_str), Some("infra"));
        assert!(debug.test);
        assert!(debug.untagged);

        let other = &resolved[2].1;
        assert_eq!(other.dir, "examples/other");
        assert_eq!(other.target.as_deref(), Some("dev"));
        assert_eq!(other.secrets.len(), 1);
        assert_eq!(other.secrets[0].id, "key");
        assert!(!other.test);
    }

    #[test]
    fn test_unnamed_variant_not_built_alongside_named_variants() {
        let mut config = parse(
            r#"
kind: ImagineBuildConfig
apiVersion: v1alpha1
spec:
  name: image-1
  dir: examples/image-1
  variants: [{ name: foo }]
"#,
        );
        config.apply_defaults_and_validate().unwrap();

        let resolved = config.spec.resolved_variants().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "foo");
    }

    #[test]
    fn test_context_and_dockerfile_paths() {
        let work_dir = Path::new("/go/src/imagine");
        let mut resolved = WithBuildInstructions {
            dir: Some(String::new()),
            dockerfile: Some(Dockerfile {
                path: "examples/image-1/Dockerfile".to_string(),
                body: String::new(),
            }),
            ..Default::default()
        }
        .resolve(&WithBuildInstructions::default(), ".spec")
        .unwrap();

        assert_eq!(resolved.context_path(work_dir), PathBuf::from("/go/src/imagine"));
        assert_eq!(
            resolved.dockerfile_path(work_dir),
            Some(PathBuf::from("/go/src/imagine/examples/image-1/Dockerfile"))
        );

        resolved.dir = "./examples/image-1/".to_string();
        resolved.dockerfile = Dockerfile {
            path: String::new(),
            body: "FROM scratch\n".to_string(),
        };
        assert_eq!(
            resolved.context_path(work_dir),
            PathBuf::from("/go/src/imagine/examples/image-1")
        );
        assert_eq!(resolved.dockerfile_path(work_dir), None);
    }

    #[test]
    fn test_load_returns_base64_data() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        let contents = "kind: ImagineBuildConfig\napiVersion: v1alpha1\nspec:\n  name: a\n  dir: .\n";
        file.write_all(contents.as_bytes())?;

        let (config, data) = load(file.path())?;
        assert_eq!(config.spec.name, "a");
        let decoded = base64::engine::general_purpose::STANDARD.decode(data)?;
        assert_eq!(decoded, contents.as_bytes());
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("non-existent")).unwrap_err();
        assert_eq!(err.to_string(), r#"unable to open config file "non-existent""#);
    }
}
