use crate::FisheyeError;
use fisheye_calib_core::{Distortion, FisheyeCamera, Intrinsics};
use serde::{Deserialize, Serialize};

/// Calibration result in its exchange form: `{"K": [[..]; 3], "D": [..; 4]}`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(rename = "K")]
    pub k: [[f64; 3]; 3],
    #[serde(rename = "D")]
    pub d: [f64; 4],
}

impl Calibration {
    /// Validated camera model; fails on skew, a malformed last row,
    /// non-positive focal lengths or non-finite values.
    pub fn camera(&self) -> Result<FisheyeCamera, FisheyeError> {
        Ok(FisheyeCamera::new(
            Intrinsics::from_matrix(self.k)?,
            Distortion::from_array(self.d)?,
        ))
    }
}

impl From<FisheyeCamera> for Calibration {
    fn from(cam: FisheyeCamera) -> Self {
        Self {
            k: cam.intrinsics.to_matrix(),
            d: cam.distortion.to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_upper_case_keys() {
        let cal = Calibration {
            k: [[300.0, 0.0, 320.0], [0.0, 301.0, 240.0], [0.0, 0.0, 1.0]],
            d: [0.1, -0.02, 0.0, 0.001],
        };
        let json = serde_json::to_value(cal).unwrap();
        assert_eq!(json["K"][1][1], 301.0);
        assert_eq!(json["D"][3], 0.001);
        let back: Calibration = serde_json::from_value(json).unwrap();
        assert_eq!(back, cal);
        assert_eq!(Calibration::from(back.camera().unwrap()), cal);
    }

    #[test]
    fn malformed_matrices_are_rejected() {
        let bad_k = Calibration {
            k: [[0.0, 0.0, 320.0], [0.0, 300.0, 240.0], [0.0, 0.0, 1.0]],
            d: [0.0; 4],
        };
        assert!(matches!(bad_k.camera(), Err(FisheyeError::MalformedParameter(_))));

        let bad_d = Calibration {
            k: [[300.0, 0.0, 320.0], [0.0, 300.0, 240.0], [0.0, 0.0, 1.0]],
            d: [0.0, f64::INFINITY, 0.0, 0.0],
        };
        assert!(bad_d.camera().is_err());

        // Wrong array lengths never deserialize.
        assert!(serde_json::from_str::<Calibration>(r#"{"K":[[1,0,0],[0,1,0]],"D":[0,0,0,0]}"#).is_err());
        assert!(serde_json::from_str::<Calibration>(
            r#"{"K":[[1,0,0],[0,1,0],[0,0,1]],"D":[0,0,0]}"#
        )
        .is_err());
    }
}
