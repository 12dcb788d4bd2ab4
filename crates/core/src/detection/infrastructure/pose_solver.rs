//! Perspective-n-point pose solve for a pinhole camera.
//!
//! Minimizes pixel reprojection error over a rotation vector and translation
//! with damped Gauss-Newton (Levenberg-Marquardt) steps and a central
//! difference Jacobian. Several starting rotations are tried so that a
//! strongly turned head does not settle in the mirrored local minimum.

use nalgebra::{DMatrix, DVector, Rotation3, Vector3};

const MIN_POINTS: usize = 4;
const MIN_DEPTH: f64 = 1e-6;
const MIN_SPREAD: f64 = 1e-9;
const MAX_ITERATIONS: usize = 200;
const MAX_DAMPING: f64 = 1e12;
/// Smallest-to-largest eigenvalue ratio of JᵀJ below which the solve is
/// considered unconstrained.
const MIN_CONDITION: f64 = 1e-18;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinholeCamera {
    pub focal_length: f64,
    pub principal_point: (f64, f64),
}

impl PinholeCamera {
    /// Pixel coordinates of a camera-space point, `None` behind the camera.
    pub fn project(&self, point: &Vector3<f64>) -> Option<(f64, f64)> {
        if point.z <= MIN_DEPTH {
            return None;
        }
        Some((
            self.focal_length * point.x / point.z + self.principal_point.0,
            self.focal_length * point.y / point.z + self.principal_point.1,
        ))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoseSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    /// Root-mean-square reprojection error in pixels.
    pub rms_error: f64,
}

impl PoseSolution {
    /// Rotation as `R = Rz · Ry · Rx`, returned as the angles about x, y
    /// and z in degrees.
    pub fn euler_degrees(&self) -> (f64, f64, f64) {
        let (x, y, z) = self.rotation.euler_angles();
        (x.to_degrees(), y.to_degrees(), z.to_degrees())
    }
}

pub struct PerspectiveSolver {
    camera: PinholeCamera,
    starts: Vec<Rotation3<f64>>,
}

impl PerspectiveSolver {
    pub fn new(camera: PinholeCamera) -> Self {
        let quarter = std::f64::consts::FRAC_PI_4;
        let sixth = std::f64::consts::FRAC_PI_6;
        Self {
            camera,
            starts: vec![
                Rotation3::identity(),
                Rotation3::from_euler_angles(0.0, quarter, 0.0),
                Rotation3::from_euler_angles(0.0, -quarter, 0.0),
                Rotation3::from_euler_angles(sixth, 0.0, 0.0),
                Rotation3::from_euler_angles(-sixth, 0.0, 0.0),
            ],
        }
    }

    pub fn camera(&self) -> PinholeCamera {
        self.camera
    }

    /// Best pose mapping `model` points onto `image` points, or `None` when
    /// the correspondence cannot constrain a pose.
    pub fn solve(&self, model: &[Vector3<f64>], image: &[(f64, f64)]) -> Option<PoseSolution> {
        if model.len() != image.len() || model.len() < MIN_POINTS {
            return None;
        }
        let finite = model.iter().all(|p| p.iter().all(|v| v.is_finite()))
            && image.iter().all(|(u, v)| u.is_finite() && v.is_finite());
        if !finite {
            return None;
        }

        let mut best: Option<(DVector<f64>, f64)> = None;
        for start in &self.starts {
            let Some(initial) = self.initial_guess(start, model, image) else {
                continue;
            };
            let Some((params, cost)) = self.refine(initial, model, image) else {
                continue;
            };
            if best.as_ref().map_or(true, |(_, c)| cost < *c) {
                best = Some((params, cost));
            }
        }

        let (params, cost) = best?;
        if !cost.is_finite() || !self.is_constrained(&params, model, image) {
            return None;
        }
        let (rotation, translation) = unpack(&params);
        Some(PoseSolution {
            rotation,
            translation,
            rms_error: (cost / model.len() as f64).sqrt(),
        })
    }

    /// Places the rotated model in front of the camera so its projected
    /// spread and centroid match the image points.
    fn initial_guess(
        &self,
        rotation: &Rotation3<f64>,
        model: &[Vector3<f64>],
        image: &[(f64, f64)],
    ) -> Option<DVector<f64>> {
        let n = model.len() as f64;
        let rotated: Vec<Vector3<f64>> = model.iter().map(|p| rotation * p).collect();
        let model_centroid = rotated.iter().sum::<Vector3<f64>>() / n;
        let image_centroid = (
            image.iter().map(|p| p.0).sum::<f64>() / n,
            image.iter().map(|p| p.1).sum::<f64>() / n,
        );

        let model_spread = (rotated
            .iter()
            .map(|p| (p.x - model_centroid.x).powi(2) + (p.y - model_centroid.y).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        let image_spread = (image
            .iter()
            .map(|p| (p.0 - image_centroid.0).powi(2) + (p.1 - image_centroid.1).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        if model_spread < MIN_SPREAD || image_spread < MIN_SPREAD {
            return None;
        }

        let f = self.camera.focal_length;
        let (cx, cy) = self.camera.principal_point;
        let depth = f * model_spread / image_spread;
        let axis = rotation.scaled_axis();
        Some(DVector::from_vec(vec![
            axis.x,
            axis.y,
            axis.z,
            (image_centroid.0 - cx) * depth / f - model_centroid.x,
            (image_centroid.1 - cy) * depth / f - model_centroid.y,
            depth - model_centroid.z,
        ]))
    }

    fn refine(
        &self,
        mut params: DVector<f64>,
        model: &[Vector3<f64>],
        image: &[(f64, f64)],
    ) -> Option<(DVector<f64>, f64)> {
        let mut residual = self.residuals(&params, model, image)?;
        let mut cost = residual.norm_squared();
        let mut damping = 1e-3;

        for _ in 0..MAX_ITERATIONS {
            let jacobian = self.jacobian(&params, model, image)?;
            let jt = jacobian.transpose();
            let normal = &jt * &jacobian;
            let gradient = &jt * &residual;

            let mut damped = normal.clone();
            for d in 0..damped.nrows() {
                damped[(d, d)] += damping * normal[(d, d)].max(MIN_SPREAD);
            }
            let Some(step) = damped.lu().solve(&(-&gradient)) else {
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    break;
                }
                continue;
            };

            let candidate = &params + &step;
            match self.residuals(&candidate, model, image) {
                Some(next) if next.norm_squared() < cost => {
                    let next_cost = next.norm_squared();
                    let improvement = cost - next_cost;
                    params = candidate;
                    residual = next;
                    cost = next_cost;
                    damping = (damping / 10.0).max(1e-12);
                    if improvement <= 1e-14 * cost.max(1.0) || step.norm() < 1e-12 {
                        break;
                    }
                }
                _ => {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        break;
                    }
                }
            }
        }
        Some((params, cost))
    }

    fn residuals(
        &self,
        params: &DVector<f64>,
        model: &[Vector3<f64>],
        image: &[(f64, f64)],
    ) -> Option<DVector<f64>> {
        let (rotation, translation) = unpack(params);
        let mut out = DVector::zeros(model.len() * 2);
        for (i, (point, (u, v))) in model.iter().zip(image).enumerate() {
            let (pu, pv) = self.camera.project(&(rotation * point + translation))?;
            out[2 * i] = pu - u;
            out[2 * i + 1] = pv - v;
        }
        Some(out)
    }

    fn jacobian(
        &self,
        params: &DVector<f64>,
        model: &[Vector3<f64>],
        image: &[(f64, f64)],
    ) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(model.len() * 2, params.len());
        for k in 0..params.len() {
            let h = 1e-6 * params[k].abs().max(1.0);
            let mut plus = params.clone();
            plus[k] += h;
            let mut minus = params.clone();
            minus[k] -= h;
            let column = (self.residuals(&plus, model, image)?
                - self.residuals(&minus, model, image)?)
                / (2.0 * h);
            jacobian.set_column(k, &column);
        }
        Some(jacobian)
    }

    fn is_constrained(
        &self,
        params: &DVector<f64>,
        model: &[Vector3<f64>],
        image: &[(f64, f64)],
    ) -> bool {
        let Some(jacobian) = self.jacobian(params, model, image) else {
            return false;
        };
        let normal = jacobian.transpose() * &jacobian;
        let eigenvalues = normal.symmetric_eigen().eigenvalues;
        let max = eigenvalues.max();
        let min = eigenvalues.min();
        max > 0.0 && min / max > MIN_CONDITION
    }
}

fn unpack(params: &DVector<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    (
        Rotation3::new(Vector3::new(params[0], params[1], params[2])),
        Vector3::new(params[3], params[4], params[5]),
    )
}
