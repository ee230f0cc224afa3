mod common;

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;

use common::registries;
use imagine::config::{BuildSpec, BuildVariant, WithBuildInstructions};
use imagine::{
    BakeManifest, DigestError, FakeRegistry, FakeRepo, ImagineRecipe, Rebuilder,
    RegistryErrorPolicy, SuffixPolicy,
};

const WORK_DIR: &str = "/go/src/github.com/errordeveloper/imagine";

fn repo() -> FakeRepo {
    FakeRepo::new()
        .with_content_hash("dummy.yaml", "613919533ebd03d6bafbd538ccad3a4acea9b761")
        .with_content_hash("examples/image-1", "16c315243fd31c00b80c188123099501ae2ccf91")
        .with_revision("15b881c016c1d81f924cc0c1ae002333253f0991")
}

fn spec(variants: Vec<BuildVariant>) -> BuildSpec {
    let mut spec = BuildSpec {
        name: "image-1".to_string(),
        with: WithBuildInstructions {
            dir: Some("examples/image-1".to_string()),
            test: Some(true),
            ..Default::default()
        },
        variants,
        ..Default::default()
    };
    spec.apply_defaults_and_validate().unwrap();
    spec
}

fn recipe(spec: BuildSpec, repo: FakeRepo) -> ImagineRecipe<FakeRepo> {
    let mut recipe = ImagineRecipe::new(
        PathBuf::from(WORK_DIR),
        "dummy.yaml".to_string(),
        "W3sgInRlc3QiOiB0cnVlIH1dCg==".to_string(),
        spec,
        repo,
    );
    recipe.suffixes = SuffixPolicy::new("origin/master");
    recipe
}

fn variants() -> Vec<BuildVariant> {
    vec![
        BuildVariant {
            name: "foo".to_string(),
            with: None,
        },
        BuildVariant {
            name: "bar".to_string(),
            with: Some(WithBuildInstructions {
                untagged: Some(true),
                test: Some(false),
                ..Default::default()
            }),
        },
    ]
}

/// Registry holding every tag of `manifest`.
fn populated_registry(manifest: &BakeManifest) -> FakeRegistry {
    manifest
        .registry_tags()
        .iter()
        .fold(FakeRegistry::new(), |registry, tag| {
            registry.with_digest(tag, "sha256:0c1082")
        })
}

#[test]
fn test_assembly_is_deterministic() -> Result<()> {
    let recipe = recipe(spec(variants()), repo());
    let first = recipe.to_bake_manifest(&registries())?;
    let second = recipe.to_bake_manifest(&registries())?;
    assert_eq!(first, second);
    assert_eq!(first.to_json()?, second.to_json()?);
    Ok(())
}

#[test]
fn test_variant_layout() -> Result<()> {
    let mut recipe = recipe(spec(variants()), repo());
    recipe.push = true;
    let manifest = recipe.to_bake_manifest(&registries())?;

    assert_eq!(
        manifest.group["default"].targets,
        ["index-image-1", "image-1-foo-test", "image-1-foo", "image-1-bar"]
    );

    let index_targets: Vec<_> = manifest
        .target
        .keys()
        .filter(|name| name.starts_with("index-"))
        .collect();
    assert_eq!(index_targets, ["index-image-1"]);

    // Untagged variants are never pushed
    let bar = &manifest.target["image-1-bar"];
    assert!(bar.tags.is_empty());
    assert_eq!(bar.output, ["type=image,push=false"]);

    let foo = &manifest.target["image-1-foo"];
    assert_eq!(foo.output, ["type=image,push=true"]);
    assert_eq!(
        manifest.target["index-image-1"].output,
        ["type=image,push=true"]
    );
    Ok(())
}

#[test]
fn test_json_round_trip() -> Result<()> {
    let recipe = recipe(spec(variants()), repo().with_wip("", true));
    let manifest = recipe.to_bake_manifest(&registries())?;

    let parsed = BakeManifest::from_json(&manifest.to_json()?)?;
    assert_eq!(
        parsed.target.keys().collect::<Vec<_>>(),
        manifest.target.keys().collect::<Vec<_>>()
    );
    assert_eq!(parsed.group, manifest.group);
    assert_eq!(
        parsed.registry_tags().into_iter().collect::<BTreeSet<_>>(),
        manifest.registry_tags().into_iter().collect::<BTreeSet<_>>()
    );
    Ok(())
}

#[test]
fn test_rebuild_decisions() -> Result<()> {
    let recipe = recipe(spec(variants()), repo());
    let manifest = recipe.to_bake_manifest(&registries())?;

    // Nothing pushed yet: the first tag in build order is reported
    let rebuilder = Rebuilder::new(FakeRegistry::new(), "-dev", "-wip");
    assert_eq!(
        rebuilder.should_rebuild(&manifest)?,
        (
            true,
            r#"rebuilding as remote image "reg1.example.com/imagine/image-1:index.15b881" is not present"#
                .to_string()
        )
    );

    // Everything pushed: no rebuild
    let rebuilder = Rebuilder::new(populated_registry(&manifest), "-dev", "-wip");
    assert_eq!(rebuilder.should_rebuild(&manifest)?, (false, String::new()));
    Ok(())
}

#[test]
fn test_rebuild_on_drift_even_when_present() -> Result<()> {
    let recipe = recipe(
        spec(variants()),
        repo().with_diverged(true).with_wip("examples/image-1", true),
    );
    let manifest = recipe.to_bake_manifest(&registries())?;
    let rebuilder = Rebuilder::new(populated_registry(&manifest), "-dev", "-wip");

    assert_eq!(
        rebuilder.should_rebuild(&manifest)?,
        (true, r#"rebuilding due to "-dev-wip" suffix"#.to_string())
    );
    Ok(())
}

#[test]
fn test_unreachable_registry() -> Result<()> {
    let recipe = recipe(spec(vec![]), repo());
    let manifest = recipe.to_bake_manifest(&registries())?;
    let first = manifest.registry_tags()[0].clone();

    let mut rebuilder = Rebuilder::new(
        FakeRegistry::new().with_unavailable(&first),
        "-dev",
        "-wip",
    );
    assert!(rebuilder.should_rebuild(&manifest)?.0);

    rebuilder.error_policy = RegistryErrorPolicy::Abort;
    let err = rebuilder.should_rebuild(&manifest).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DigestError>(),
        Some(DigestError::Unavailable { .. })
    ));
    Ok(())
}
