//! Initial camera framing for a freshly loaded cloud.
//!
//! The framing constants are empirical, not derived from a field of view.

use serde::{Deserialize, Serialize};

use crate::pointcloud::bounds::BoundingVolume;

const ORTHO_ZOOM_REFERENCE: f32 = 50.0;
const ORTHO_DISTANCE_FACTOR: f32 = 0.8;
const ORTHO_AXIS_OFFSET: f32 = 0.7;
const FIRST_PERSON_DISTANCE_FACTOR: f32 = 1.5;
const FIRST_PERSON_HEIGHT_FACTOR: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    #[default]
    Orthographic,
    FirstPerson,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CameraPose {
    Orthographic {
        position: [f32; 3],
        target: [f32; 3],
        zoom: f32,
    },
    /// Y-up, looking down -Z with zero yaw and pitch.
    FirstPerson {
        position: [f32; 3],
        yaw: f32,
        pitch: f32,
    },
}

impl CameraPose {
    pub fn position(&self) -> [f32; 3] {
        match self {
            CameraPose::Orthographic { position, .. } | CameraPose::FirstPerson { position, .. } => {
                *position
            }
        }
    }
}

pub fn fit_camera(bounds: &BoundingVolume, mode: ProjectionMode) -> CameraPose {
    let center = bounds.center();
    let diagonal = bounds.diagonal();

    match mode {
        ProjectionMode::Orthographic => {
            let mut max_dimension = bounds.max_dimension();
            if max_dimension <= 0.0 {
                max_dimension = 1.0;
            }
            let zoom = (ORTHO_ZOOM_REFERENCE / max_dimension).max(1.0);
            let offset = diagonal * ORTHO_DISTANCE_FACTOR * ORTHO_AXIS_OFFSET;

            CameraPose::Orthographic {
                position: [center[0] + offset, center[1] + offset, center[2] + offset],
                target: center,
                zoom,
            }
        }
        ProjectionMode::FirstPerson => {
            let distance = diagonal * FIRST_PERSON_DISTANCE_FACTOR;

            CameraPose::FirstPerson {
                position: [
                    center[0],
                    center[1] + distance * FIRST_PERSON_HEIGHT_FACTOR,
                    center[2] + distance,
                ],
                yaw: 0.0,
                pitch: 0.0,
            }
        }
    }
}
