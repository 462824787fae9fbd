// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::config::CoordinatorConfig;
use crate::metrics::DispatchMetrics;
use crate::milestone::LateBootSignal;
use crate::platform::{ThreadPlatform, ThreadTimer};
use crate::Coordinator;
use anyhow::Context;
use mpdispatch_config::TopologyManifest;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A coordinator running on the thread backend, with the pieces a front end
/// needs to drive it.
#[derive(Debug)]
pub struct SimulatedSystem {
    pub manifest: TopologyManifest,
    pub coordinator: Coordinator,
    pub late_boot: Arc<LateBootSignal>,
    pub metrics: Arc<DispatchMetrics>,
}

/// Builds a thread-backed coordinator from a topology manifest path.
/// If no path is provided, a uniform topology of `units` units is used.
///
/// The calling thread becomes the controller.
pub fn build_simulated(topology_path: Option<&Path>, units: usize) -> anyhow::Result<SimulatedSystem> {
    let manifest = if let Some(path) = topology_path {
        info!("Loading topology manifest: {:?}", path);
        TopologyManifest::from_file(path)?
    } else {
        info!("Using default topology with {} unit(s)", units);
        let manifest = TopologyManifest::uniform("default", units);
        manifest.validate()?;
        manifest
    };

    let platform = Arc::new(ThreadPlatform::from_manifest(&manifest));
    let late_boot = Arc::new(LateBootSignal::new());
    let metrics = Arc::new(DispatchMetrics::new());

    let coordinator = Coordinator::builder(platform, Arc::new(ThreadTimer::new()))
        .config(CoordinatorConfig::from(&manifest.coordinator))
        .observer(metrics.clone())
        .late_boot(late_boot.clone())
        .build()
        .with_context(|| format!("Failed to start coordinator for topology '{}'", manifest.name))?;

    Ok(SimulatedSystem {
        manifest,
        coordinator,
        late_boot,
        metrics,
    })
}
