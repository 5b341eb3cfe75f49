//! Feature Resolver. Manifest-driven feature availability with a
//! conditional build trigger. Never reads the raw-ingest file itself; a
//! build, when permitted, is delegated to a [`FeatureBuilder`] collaborator.

use crate::error::{CoreError, CoreResult};
use crate::features::{FeatureBundle, FeatureSeries, FeaturesManifest, BREAKS_POLICY, TS_DTYPE};
use crate::layout::Layout;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FeatureRequirement {
    pub name: String,
    pub timeframe_min: u32,
}

/// Carries what a build needs beyond the resolver's own inputs: the raw
/// ingest collaborator's text source. The resolver never opens this file
/// itself. It only threads the path to the builder.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub txt_path: PathBuf,
}

/// External collaborator that runs the Bars/Features pipeline on demand.
/// Implementations live outside this module (the runner, or a test double).
pub trait FeatureBuilder {
    fn build(&self, season: &str, dataset_id: &str, ctx: &BuildContext) -> CoreResult<()>;
}

pub struct ResolveRequest<'a> {
    pub season: &'a str,
    pub dataset_id: &'a str,
    pub required: &'a [FeatureRequirement],
    pub allow_build: bool,
    pub build_context: Option<BuildContext>,
}

pub struct ResolveResult {
    pub bundle: FeatureBundle,
    pub build_performed: bool,
}

fn load_manifest(layout: &Layout, season: &str, dataset_id: &str) -> CoreResult<Option<FeaturesManifest>> {
    let path = layout.features_manifest(season, dataset_id);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn load_bundle(layout: &Layout, season: &str, dataset_id: &str, manifest: &FeaturesManifest) -> CoreResult<FeatureBundle> {
    let mut bundle: FeatureBundle = BTreeMap::new();
    let mut timeframes: Vec<u32> = manifest.specs.iter().map(|s| s.timeframe_min).collect();
    timeframes.sort_unstable();
    timeframes.dedup();
    for tf in timeframes {
        let path = layout.features_file(season, dataset_id, tf);
        if !path.exists() {
            continue;
        }
        let bytes = std::fs::read(&path)?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        let by_name: BTreeMap<String, FeatureSeries> =
            serde_json::from_value(value.get("features").cloned().unwrap_or(serde_json::Value::Null))?;
        bundle.insert(tf, by_name);
    }
    Ok(bundle)
}

fn missing_set(manifest: Option<&FeaturesManifest>, required: &[FeatureRequirement]) -> Vec<(String, u32)> {
    let Some(m) = manifest else {
        return required.iter().map(|r| (r.name.clone(), r.timeframe_min)).collect();
    };
    required
        .iter()
        .filter(|r| {
            !m.specs
                .iter()
                .any(|s| s.name == r.name && s.timeframe_min == r.timeframe_min)
        })
        .map(|r| (r.name.clone(), r.timeframe_min))
        .collect()
}

/// Resolve a Feature Bundle for `req`, building it first if permitted and necessary.
pub fn resolve(layout: &Layout, req: &ResolveRequest, builder: &dyn FeatureBuilder) -> CoreResult<ResolveResult> {
    let manifest = load_manifest(layout, req.season, req.dataset_id)?;

    if manifest.is_none() && !req.allow_build {
        return Err(CoreError::MissingFeatures(
            req.required.iter().map(|r| (r.name.clone(), r.timeframe_min)).collect(),
        ));
    }

    if let Some(m) = &manifest {
        if m.ts_dtype != TS_DTYPE {
            return Err(CoreError::ManifestMismatch("ts_dtype".to_string()));
        }
        if m.breaks_policy != BREAKS_POLICY {
            return Err(CoreError::ManifestMismatch("breaks_policy".to_string()));
        }
    }

    let missing = missing_set(manifest.as_ref(), req.required);
    if missing.is_empty() {
        let m = manifest.expect("manifest present when nothing is missing");
        let bundle = load_bundle(layout, req.season, req.dataset_id, &m)?;
        return Ok(ResolveResult { bundle, build_performed: false });
    }

    if !req.allow_build {
        return Err(CoreError::MissingFeatures(missing));
    }
    let ctx = req.build_context.clone().ok_or(CoreError::BuildNotAllowed)?;
    builder.build(req.season, req.dataset_id, &ctx)?;

    let rebuilt = load_manifest(layout, req.season, req.dataset_id)?
        .ok_or_else(|| CoreError::NotFound(format!("features manifest for {}/{}", req.season, req.dataset_id)))?;
    let still_missing = missing_set(Some(&rebuilt), req.required);
    if !still_missing.is_empty() {
        return Err(CoreError::MissingFeatures(still_missing));
    }
    let bundle = load_bundle(layout, req.season, req.dataset_id, &rebuilt)?;
    Ok(ResolveResult { bundle, build_performed: true })
}
