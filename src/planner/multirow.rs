//! Multi-row planning for bracketed, multi-row panoramas.
//!
//! Phase one chains consecutive exposures inside every stack and chains one
//! representative per stack (the layer). Phase two bridges disconnected
//! parts of the layer. Phase three aligns the layer with the optimizer and
//! schedules the remaining overlapping layer pairs.

use super::{components, overlap_tasks, sequential_tasks, CheckedPairs, MatchTask};
use crate::algorithms::ControlPoint;
use crate::optimizer::{OptimizeRequest, OrientationVars, PanoImage, SharedOptimizer, SubPanorama};
use crate::project::ImageEntry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Field of view widening used when predicting layer overlaps
pub const LAYER_HFOV_FACTOR: f64 = 1.25;

/// Stack grouping of a project's images.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackLayout {
    /// Every stack, members sorted by exposure value
    pub stacks: Vec<Vec<usize>>,
    /// One representative image per stack
    pub layer: BTreeSet<usize>,
    /// Stacks of two or more images whose positions are not linked
    pub unlinked_stacks: Vec<Vec<usize>>,
}

fn yaw_linked(images: &[ImageEntry], index: usize) -> bool {
    images[index].yaw_link.is_some() || images.iter().any(|e| e.yaw_link == Some(index))
}

impl StackLayout {
    pub fn build(images: &[ImageEntry]) -> Self {
        let mut by_stack: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut stacks: Vec<Vec<usize>> = Vec::new();
        for (index, image) in images.iter().enumerate() {
            match image.stack {
                Some(stack) => by_stack.entry(stack).or_default().push(index),
                None => stacks.push(vec![index]),
            }
        }
        stacks.extend(by_stack.into_values());
        stacks.sort_by_key(|members| members[0]);

        let mut layout = Self::default();
        for mut members in stacks {
            members.sort_by(|a, b| images[*a].exposure.total_cmp(&images[*b].exposure));
            let first = members[0];
            let last = members[members.len() - 1];
            let representative = if images[first].exposure != images[last].exposure {
                members[members.len() / 2]
            } else {
                first
            };
            layout.layer.insert(representative);
            if members.len() > 1 && !yaw_linked(images, first) {
                layout.unlinked_stacks.push(members.clone());
            }
            layout.stacks.push(members);
        }
        layout
    }

    /// Images that need keypoints: the layer plus every unlinked stack.
    pub fn analysis_set(&self) -> BTreeSet<usize> {
        let mut set = self.layer.clone();
        for stack in &self.unlinked_stacks {
            set.extend(stack.iter().copied());
        }
        set
    }

    /// Consecutive exposures inside each unlinked stack.
    pub fn stack_tasks(&self, checked: &mut CheckedPairs) -> Vec<MatchTask> {
        self.unlinked_stacks
            .iter()
            .flat_map(|stack| stack.windows(2).map(|w| (w[0], w[1])).collect::<Vec<_>>())
            .filter_map(|(a, b)| checked.claim(a, b))
            .collect()
    }

    /// Linear chain over the layer in index order.
    pub fn layer_chain(&self, checked: &mut CheckedPairs) -> Vec<MatchTask> {
        let layer: Vec<usize> = self.layer.iter().copied().collect();
        sequential_tasks(&layer, Some(1), checked)
    }

    /// Components of the layer under `control_points`, as project indices.
    pub fn layer_components(&self, control_points: &[ControlPoint]) -> Vec<Vec<usize>> {
        let layer: Vec<usize> = self.layer.iter().copied().collect();
        let position = |image: usize| layer.binary_search(&image).ok();
        let edges = control_points
            .iter()
            .filter_map(|cp| Some((position(cp.image1)?, position(cp.image2)?)));
        components(layer.len(), edges)
            .into_iter()
            .map(|comp| comp.into_iter().map(|p| layer[p]).collect())
            .collect()
    }

    /// When the layer falls apart, match the first and last image of every
    /// component against those of every other component.
    pub fn bridge_tasks(&self, control_points: &[ControlPoint], checked: &mut CheckedPairs) -> Vec<MatchTask> {
        let comps = self.layer_components(control_points);
        if comps.len() < 2 {
            return Vec::new();
        }
        let mut ends = Vec::new();
        for comp in &comps {
            ends.push(comp[0]);
            if comp.len() > 1 {
                ends.push(comp[comp.len() - 1]);
            }
        }
        debug!(components = comps.len(), "Bridging layer components");
        let mut tasks = Vec::new();
        for (k, &a) in ends.iter().enumerate() {
            for &b in &ends[k + 1..] {
                if let Some(task) = checked.claim(a, b) {
                    tasks.push(task);
                }
            }
        }
        tasks
    }

    /// Sub-panorama of the layer images with their control points. Image
    /// translation is not carried over. Returns the panorama and the project
    /// index of each of its images.
    pub fn layer_panorama(&self, images: &[ImageEntry], control_points: &[ControlPoint]) -> (SubPanorama, Vec<usize>) {
        let map: Vec<usize> = self.layer.iter().copied().collect();
        let position = |image: usize| map.binary_search(&image).ok();
        let pano = SubPanorama {
            images: map
                .iter()
                .map(|&i| PanoImage {
                    lens: images[i].lens(),
                    orientation: images[i].orientation(),
                })
                .collect(),
            control_points: control_points
                .iter()
                .filter_map(|cp| {
                    Some(ControlPoint {
                        image1: position(cp.image1)?,
                        image2: position(cp.image2)?,
                        ..*cp
                    })
                })
                .collect(),
        };
        (pano, map)
    }

    /// Final multi-row phase. A connected layer of more than two images is
    /// aligned and its overlapping pairs are scheduled; a disconnected layer
    /// falls back to every unchecked pair of analysed images.
    pub fn final_tasks(
        &self,
        images: &[ImageEntry],
        control_points: &[ControlPoint],
        optimizer: &SharedOptimizer,
        checked: &mut CheckedPairs,
    ) -> Vec<MatchTask> {
        if self.layer_components(control_points).len() != 1 {
            info!("Layer still disconnected, matching all remaining pairs");
            let analysed: Vec<usize> = self.analysis_set().into_iter().collect();
            return sequential_tasks(&analysed, None, checked);
        }
        if self.layer.len() <= 2 {
            return Vec::new();
        }
        let (mut pano, map) = self.layer_panorama(images, control_points);
        let rms = align_layer(&mut pano, optimizer);
        info!(images = map.len(), rms_deg = rms, "Aligned layer");
        overlap_tasks(&pano, &map, LAYER_HFOV_FACTOR, checked)
    }
}

/// Pairwise initialisation then full yaw/pitch optimisation, anchored on
/// the first image. Returns the RMS error in degrees.
pub fn align_layer(pano: &mut SubPanorama, optimizer: &SharedOptimizer) -> f64 {
    let request = OptimizeRequest {
        anchor: 0,
        vars: OrientationVars::YawPitch,
        ..Default::default()
    };
    let mut optimizer = optimizer.lock();
    optimizer.pairwise(pano, &request);
    optimizer.optimize(pano, &request)
}
