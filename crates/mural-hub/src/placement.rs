//! Image placement: selector evaluation, orientation partitioning, and
//! the last-to-first assignment loop.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::join_all;

use mural_core::error::{MuralError, Result};
use mural_core::protocol::{
    Command, CommandPayload, Identity, ImageData, NodeSelector, Op, SelectorKey, SelectorLogic,
    SetImagePayload, ShowImagesPayload,
};

use crate::session::NodeSession;
use crate::state::Hub;

/// Saturation passed to every placed image.
const PLACEMENT_SATURATION: f64 = 0.5;

/// Does one selector match this identity? A session that never registered
/// has no identity and matches nothing name- or label-shaped.
pub fn selector_matches(identity: Option<&Identity>, sel: &NodeSelector) -> bool {
    match sel.key {
        SelectorKey::Any => true,
        SelectorKey::None => false,
        SelectorKey::NameEquals => identity.map(|i| i.name == sel.value).unwrap_or(false),
        SelectorKey::NameContains => identity.map(|i| i.name.contains(&sel.value)).unwrap_or(false),
        SelectorKey::HasLabel => identity.map(|i| i.has_label(&sel.value)).unwrap_or(false),
        SelectorKey::Unknown => false,
    }
}

/// Fold selectors left-to-right starting from `true`, combining each
/// verdict with the selector's own logic. No selectors admits everything.
pub fn selectors_admit(identity: Option<&Identity>, selectors: &[NodeSelector]) -> bool {
    let mut include = true;
    for sel in selectors {
        let matched = selector_matches(identity, sel);
        include = match sel.logic {
            SelectorLogic::Or => include || matched,
            // Unrecognized logic folds as AND.
            _ => include && matched,
        };
    }
    include
}

/// Split eligible targets into portrait and landscape buckets, dropping
/// anything that never registered or has no responding display. Dropping
/// here is silent: a fleet with no ready displays places nothing. Both
/// buckets preserve the input order — the fleet treats nodes
/// symmetrically.
pub fn partition_by_orientation<T>(
    targets: Vec<(T, Option<Identity>)>,
) -> (VecDeque<T>, VecDeque<T>) {
    let mut portrait = VecDeque::new();
    let mut landscape = VecDeque::new();
    for (target, identity) in targets {
        let Some(identity) = identity else {
            tracing::debug!("ignoring unregistered peer");
            continue;
        };
        let ready = identity.display.as_ref().map(|d| d.responding).unwrap_or(false);
        if !ready {
            tracing::debug!(name = %identity.name, "ignoring node, not ready");
            continue;
        }
        if identity.orientation.is_portrait() {
            portrait.push_back(target);
        } else {
            landscape.push_back(target);
        }
    }
    (portrait, landscape)
}

/// One image-to-target assignment produced by [`assign`].
pub struct Assignment<T> {
    pub target: T,
    pub image_index: usize,
}

/// Walk the image list last-to-first, matching each image's shape against
/// the available buckets. The last image in the operator's list is the
/// primary one: when displays run out, later images win placement.
///
/// Returns the assignments plus any orientation-mismatch errors. A
/// non-decodable image aborts the whole request.
pub fn assign<T>(
    images: &[ImageData],
    mut portrait: VecDeque<T>,
    mut landscape: VecDeque<T>,
    must_fit_orientation: bool,
) -> Result<(Vec<Assignment<T>>, Vec<String>)> {
    let mut assignments = Vec::new();
    let mut errors = Vec::new();

    for index in (0..images.len()).rev() {
        let image = &images[index];
        let dims = imagesize::blob_size(&image.data)
            .map_err(|e| MuralError::app(format!("decoding image {}: {e}", image.name)))?;
        tracing::debug!(name = %image.name, width = dims.width, height = dims.height, "sizing image");

        let (prefer, backup) = if dims.width > dims.height {
            (&mut landscape, &mut portrait)
        } else {
            (&mut portrait, &mut landscape)
        };

        if let Some(target) = prefer.pop_front() {
            assignments.push(Assignment { target, image_index: index });
            continue;
        }
        if must_fit_orientation {
            errors.push(format!(
                "orientation mismatch: no preferred orientation nodes found to display {}",
                image.name
            ));
            continue;
        }
        match backup.pop_front() {
            Some(target) => assignments.push(Assignment { target, image_index: index }),
            // No more nodes to display images. We're done.
            None => break,
        }
    }

    Ok((assignments, errors))
}

/// Handle a `showImages` request end to end.
pub async fn show_images(hub: &Hub, cmd: &Command) -> Result<()> {
    let Some(CommandPayload::ShowImages(payload)) = &cmd.payload else {
        return Err(MuralError::Protocol("invalid show images payload".into()));
    };
    if payload.images.is_empty() {
        return Err(MuralError::app("no images received"));
    }

    for image in &payload.images {
        hub.cache()
            .save(&image.name, &image.data)
            .map_err(|e| MuralError::app(format!("error saving image {}: {e}", image.name)))?;
    }
    if let Ok(bytes) = hub.cache().total_bytes() {
        hub.metrics().cache_bytes.set(&[], bytes as i64);
    }

    let (portrait, landscape) = eligible_buckets(hub, &payload.node_selectors).await?;
    let (assignments, mut errors) = assign(
        &payload.images,
        portrait,
        landscape,
        payload.must_fit_orientation,
    )?;

    let sends = assignments.into_iter().map(|a| {
        let image = &payload.images[a.image_index];
        display_on(hub, a.target, image, payload)
    });
    for outcome in join_all(sends).await {
        if let Err(e) = outcome {
            hub.metrics().placements.inc(&[("outcome", "error")]);
            errors.push(e.to_string());
        } else {
            hub.metrics().placements.inc(&[("outcome", "ok")]);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(MuralError::app(errors.join(" AND ")))
    }
}

/// Evaluate selectors over a registry snapshot and bucket the survivors.
///
/// Only the selector step can fail: an empty selector-filtered set means
/// the request named nobody. Dropping unregistered or not-ready sessions
/// happens in the partition and is not an error — the assignment loop
/// just runs out of nodes and stops.
async fn eligible_buckets(
    hub: &Hub,
    selectors: &[NodeSelector],
) -> Result<(VecDeque<Arc<NodeSession>>, VecDeque<Arc<NodeSession>>)> {
    let mut eligible = Vec::new();
    for session in hub.snapshot().await {
        let identity = session.identity().await;
        if selectors_admit(identity.as_ref(), selectors) {
            eligible.push((session, identity));
        }
    }
    if eligible.is_empty() {
        return Err(MuralError::app("no nodes are eligible to display"));
    }
    Ok(partition_by_orientation(eligible))
}

async fn display_on(
    hub: &Hub,
    session: Arc<NodeSession>,
    image: &ImageData,
    payload: &ShowImagesPayload,
) -> Result<()> {
    tracing::info!(image = %image.name, node = session.remote_addr(), "placing image");
    let cmd = Command::new(
        Op::SetImage,
        Some(CommandPayload::SetImage(SetImagePayload {
            name: image.name.clone(),
            hash: image.hash.clone(),
            saturation: Some(PLACEMENT_SATURATION),
            fit_policy: payload.fit_policy,
        })),
    );
    session
        .request(cmd, hub.cfg().hub.set_image_timeout())
        .await
        .map_err(|e| {
            MuralError::app(format!(
                "failed to display image {} on {}: {e}",
                image.name,
                session.remote_addr()
            ))
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use mural_core::protocol::{DisplayInfo, Orientation, Role};

    fn identity(name: &str, labels: &[&str], orientation: Orientation) -> Identity {
        Identity {
            name: name.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            orientation,
            role: Role::Node,
            hostname: String::new(),
            username: String::new(),
            num_cpu: 0,
            pid: 0,
            display: Some(DisplayInfo {
                responding: true,
                width: 800,
                height: 480,
                refresh_estimate_ms: 60_000,
                raw: Vec::new(),
            }),
            display_error: String::new(),
        }
    }

    fn sel(logic: SelectorLogic, key: SelectorKey, value: &str) -> NodeSelector {
        NodeSelector {
            logic,
            key,
            value: value.into(),
        }
    }

    /// A minimal PNG header carrying the given dimensions; enough for
    /// header-only sizing.
    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        out.extend_from_slice(&13u32.to_be_bytes());
        out.extend_from_slice(b"IHDR");
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&[8, 2, 0, 0, 0]);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    fn image(name: &str, width: u32, height: u32) -> ImageData {
        let data = png_bytes(width, height);
        let hash = mural_core::hash::hash_bytes(&data);
        ImageData {
            name: name.into(),
            origin: String::new(),
            hash,
            data,
        }
    }

    #[test]
    fn no_selectors_admit_all() {
        let id = identity("alpha", &[], Orientation::ButtonsLeft);
        assert!(selectors_admit(Some(&id), &[]));
        assert!(selectors_admit(None, &[]));
    }

    #[test]
    fn and_or_fold_over_labels() {
        // kitchen, kitchen+hallway, bedroom: (AND hasLabel kitchen) then
        // (OR hasLabel bedroom) admits all three.
        let selectors = [
            sel(SelectorLogic::And, SelectorKey::HasLabel, "kitchen"),
            sel(SelectorLogic::Or, SelectorKey::HasLabel, "bedroom"),
        ];
        let kitchen = identity("k", &["kitchen"], Orientation::ButtonsLeft);
        let both = identity("kh", &["kitchen", "hallway"], Orientation::ButtonsLeft);
        let bedroom = identity("b", &["bedroom"], Orientation::ButtonsLeft);
        assert!(selectors_admit(Some(&kitchen), &selectors));
        assert!(selectors_admit(Some(&both), &selectors));
        assert!(selectors_admit(Some(&bedroom), &selectors));

        let hallway_only = identity("h", &["hallway"], Orientation::ButtonsLeft);
        assert!(!selectors_admit(Some(&hallway_only), &selectors));
    }

    #[test]
    fn name_selectors() {
        let id = identity("kitchen-east", &[], Orientation::ButtonsLeft);
        assert!(selector_matches(
            Some(&id),
            &sel(SelectorLogic::And, SelectorKey::NameEquals, "kitchen-east")
        ));
        assert!(selector_matches(
            Some(&id),
            &sel(SelectorLogic::And, SelectorKey::NameContains, "east")
        ));
        assert!(!selector_matches(
            Some(&id),
            &sel(SelectorLogic::And, SelectorKey::NameEquals, "kitchen")
        ));
        // No identity yet: nothing name-shaped matches.
        assert!(!selector_matches(
            None,
            &sel(SelectorLogic::And, SelectorKey::NameContains, "")
        ));
    }

    #[test]
    fn unknown_logic_folds_as_and() {
        let id = identity("a", &[], Orientation::ButtonsLeft);
        let selectors = [sel(SelectorLogic::Unknown, SelectorKey::None, "")];
        assert!(!selectors_admit(Some(&id), &selectors));
    }

    #[test]
    fn selection_is_deterministic() {
        let id = identity("a", &["x"], Orientation::ButtonsLeft);
        let selectors = [
            sel(SelectorLogic::And, SelectorKey::HasLabel, "x"),
            sel(SelectorLogic::Or, SelectorKey::None, ""),
        ];
        let first = selectors_admit(Some(&id), &selectors);
        for _ in 0..10 {
            assert_eq!(selectors_admit(Some(&id), &selectors), first);
        }
    }

    #[test]
    fn partition_drops_unready_displays() {
        let mut dead = identity("dead", &[], Orientation::ButtonsUp);
        dead.display = None;
        let mut mute = identity("mute", &[], Orientation::ButtonsUp);
        if let Some(d) = mute.display.as_mut() {
            d.responding = false;
        }
        let targets = vec![
            ("p", Some(identity("p", &[], Orientation::ButtonsUp))),
            ("l", Some(identity("l", &[], Orientation::ButtonsRight))),
            ("dead", Some(dead)),
            ("mute", Some(mute)),
            ("ghost", None),
        ];
        let (portrait, landscape) = partition_by_orientation(targets);
        assert_eq!(portrait, VecDeque::from(vec!["p"]));
        assert_eq!(landscape, VecDeque::from(vec!["l"]));
    }

    #[test]
    fn no_ready_displays_places_nothing() {
        // An eligible set with no ready displays is not an error unless
        // the request demands orientation fits; the loop just stops.
        let images = vec![image("i1.png", 200, 100)];
        let empty = partition_by_orientation::<&str>(vec![("ghost", None)]);
        let (assignments, errors) = assign(&images, empty.0, empty.1, false).unwrap();
        assert!(assignments.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn assigns_by_orientation_preference() {
        // Images: I1 portrait, I2 landscape, I3 square (counts as
        // portrait-preferred); nodes: one portrait, two landscape.
        let images = vec![
            image("i1.png", 100, 200),
            image("i2.png", 200, 100),
            image("i3.png", 50, 50),
        ];
        let portrait = VecDeque::from(vec!["P1"]);
        let landscape = VecDeque::from(vec!["L1", "L2"]);

        let (assignments, errors) = assign(&images, portrait, landscape, false).unwrap();
        assert!(errors.is_empty());
        assert_eq!(assignments.len(), 3);
        // Last image first: I3 prefers portrait and takes P1; I2 takes a
        // landscape node; I1 prefers portrait, falls back to landscape.
        assert_eq!(assignments[0].image_index, 2);
        assert_eq!(assignments[0].target, "P1");
        assert_eq!(assignments[1].image_index, 1);
        assert_eq!(assignments[1].target, "L1");
        assert_eq!(assignments[2].image_index, 0);
        assert_eq!(assignments[2].target, "L2");
    }

    #[test]
    fn must_fit_records_mismatches() {
        let images = vec![
            image("i1.png", 100, 200),
            image("i2.png", 200, 100),
            image("i3.png", 50, 50),
        ];
        let (assignments, errors) =
            assign(&images, VecDeque::new(), VecDeque::from(vec!["L1"]), true).unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].image_index, 1, "only the landscape image fits");
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.contains("orientation mismatch")));
    }

    #[test]
    fn stops_when_nodes_run_out() {
        let images = vec![
            image("i1.png", 200, 100),
            image("i2.png", 200, 100),
            image("i3.png", 200, 100),
        ];
        let (assignments, errors) =
            assign(&images, VecDeque::new(), VecDeque::from(vec!["L1"]), false).unwrap();
        assert!(errors.is_empty());
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].image_index, 2, "the last image wins placement");
    }

    #[test]
    fn undecodable_image_aborts() {
        let bad = ImageData {
            name: "junk.bin".into(),
            origin: String::new(),
            hash: String::new(),
            data: vec![1, 2, 3],
        };
        assert!(assign(&[bad], VecDeque::new(), VecDeque::from(vec!["L1"]), false).is_err());
    }
}
