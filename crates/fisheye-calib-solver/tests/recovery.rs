use approx::assert_relative_eq;
use fisheye_calib_core::{Distortion, FisheyeCamera, Intrinsics, PatternGeometry, Pose};
use fisheye_calib_solver::{calibrate, FixDistortion, SolverError, SolverParams};
use nalgebra::{Point2, Point3, Rotation3, Vector3};

const SIZE: (usize, usize) = (640, 480);

fn truth() -> FisheyeCamera {
    FisheyeCamera::new(
        Intrinsics::new(300.0, 300.6, 322.3, 236.8).unwrap(),
        Distortion::from_array([0.08, -0.03, 0.01, -0.002]).unwrap(),
    )
}

fn board() -> Vec<Point3<f64>> {
    PatternGeometry::with_spacing(6, 9, 0.1)
        .unwrap()
        .object_points()
}

/// Board poses spread over the field of view, tilted both ways.
fn poses() -> Vec<Pose> {
    [
        (0.0, 0.0, 0.0, Vector3::new(-0.4, -0.25, 0.9)),
        (0.5, 0.0, 0.1, Vector3::new(-0.9, -0.7, 0.7)),
        (-0.4, 0.4, -0.2, Vector3::new(0.2, -0.6, 0.8)),
        (0.3, -0.5, 0.3, Vector3::new(-1.0, 0.1, 0.9)),
        (-0.5, -0.3, -0.1, Vector3::new(0.1, 0.2, 0.8)),
        (0.2, 0.6, 0.5, Vector3::new(-0.5, -0.2, 1.1)),
    ]
    .into_iter()
    .map(|(rx, ry, rz, t)| Pose::new(Rotation3::from_euler_angles(rx, ry, rz), t))
    .collect()
}

fn observations(cam: &FisheyeCamera) -> (Vec<Vec<Point3<f64>>>, Vec<Vec<Point2<f64>>>) {
    let obj = board();
    let images = poses()
        .iter()
        .map(|pose| {
            obj.iter()
                .map(|x| cam.project(&pose.transform(x)).expect("in front of camera"))
                .collect()
        })
        .collect::<Vec<Vec<_>>>();
    (vec![obj; images.len()], images)
}

#[test]
fn recovers_exact_intrinsics() {
    let cam = truth();
    let (objects, images) = observations(&cam);
    let out = calibrate(&objects, &images, SIZE, &SolverParams::default()).unwrap();

    let k = out.camera.intrinsics;
    assert_relative_eq!(k.fx, 300.0, max_relative = 1e-3);
    assert_relative_eq!(k.fy, 300.6, max_relative = 1e-3);
    assert!((k.cx - 322.3).abs() < 0.3, "cx {}", k.cx);
    assert!((k.cy - 236.8).abs() < 0.3, "cy {}", k.cy);

    let d = out.camera.distortion.to_array();
    for (got, want) in d.iter().zip(cam.distortion.to_array()) {
        assert!((got - want).abs() < 1e-3, "distortion {d:?}");
    }
    assert!(out.rms < 1e-3, "rms {}", out.rms);
    assert_eq!(out.per_view_rms.len(), objects.len());
    assert!(out.iterations >= 1);
}

#[test]
fn view_order_does_not_matter() {
    let (objects, images) = observations(&truth());
    let params = SolverParams::default();
    let a = calibrate(&objects, &images, SIZE, &params).unwrap();

    let mut order: Vec<usize> = (0..images.len()).collect();
    order.reverse();
    order.swap(1, 3);
    let objects_p: Vec<_> = order.iter().map(|&i| objects[i].clone()).collect();
    let images_p: Vec<_> = order.iter().map(|&i| images[i].clone()).collect();
    let b = calibrate(&objects_p, &images_p, SIZE, &params).unwrap();

    let (ka, kb) = (a.camera.intrinsics, b.camera.intrinsics);
    for (x, y) in [(ka.fx, kb.fx), (ka.fy, kb.fy), (ka.cx, kb.cx), (ka.cy, kb.cy)] {
        assert_relative_eq!(x, y, max_relative = 1e-6);
    }
    let (da, db) = (a.camera.distortion.to_array(), b.camera.distortion.to_array());
    for (x, y) in da.iter().zip(db) {
        assert!((x - y).abs() < 1e-6);
    }
}

#[test]
fn noisy_corners_still_fit() {
    let cam = truth();
    let (objects, mut images) = observations(&cam);
    // Deterministic sub-pixel jitter.
    let mut state = 0x9e37_79b9_u32;
    for p in images.iter_mut().flatten() {
        let p = &mut **p;
        for c in [&mut p.x, &mut p.y] {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            *c += (state as f64 / u32::MAX as f64 - 0.5) * 0.2;
        }
    }
    let out = calibrate(&objects, &images, SIZE, &SolverParams::default()).unwrap();
    assert_relative_eq!(out.camera.intrinsics.fx, 300.0, max_relative = 1e-2);
    assert!(out.rms < 0.15, "rms {}", out.rms);
}

#[test]
fn fixed_coefficients_are_not_fitted() {
    let (objects, images) = observations(&truth());
    let params = SolverParams {
        fix_distortion: FixDistortion {
            k3: true,
            k4: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let out = calibrate(&objects, &images, SIZE, &params).unwrap();
    assert_eq!(out.camera.distortion.k3, 0.0);
    assert_eq!(out.camera.distortion.k4, 0.0);
    // Two coefficients cannot absorb the full curve exactly.
    assert!(out.rms > 1e-4);
}

#[test]
fn collinear_view_is_ill_conditioned() {
    let (mut objects, mut images) = observations(&truth());
    let line: Vec<Point3<f64>> = (0..9).map(|c| Point3::new(c as f64 * 0.1, 0.0, 0.0)).collect();
    let pose = Pose::new(Rotation3::identity(), Vector3::new(-0.4, 0.0, 1.0));
    let projected = line
        .iter()
        .map(|x| truth().project(&pose.transform(x)).unwrap())
        .collect();
    objects.push(line);
    images.push(projected);

    let err = calibrate(&objects, &images, SIZE, &SolverParams::default()).unwrap_err();
    assert!(
        matches!(err, SolverError::IllConditionedView { .. }),
        "unexpected {err:?}"
    );
}

#[test]
fn single_fronto_parallel_view_is_ill_conditioned() {
    let (objects, images) = observations(&truth());
    // View 0 faces the camera squarely; focal length and depth trade off.
    let err = calibrate(&objects[..1], &images[..1], SIZE, &SolverParams::default()).unwrap_err();
    match err {
        SolverError::IllConditioned { condition } => {
            assert!(condition > SolverParams::default().max_condition, "{condition:e}")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn empty_input_is_rejected() {
    let err = calibrate(&[], &[], SIZE, &SolverParams::default()).unwrap_err();
    assert!(matches!(err, SolverError::InvalidInput(_)));
}
