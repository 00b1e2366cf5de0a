//! Derivative-free minimization (Nelder–Mead simplex) used for likelihood fits.

#[derive(Debug, Clone)]
pub struct NelderMead {
    pub max_iterations: usize,
    pub x_tolerance: f64,
    pub f_tolerance: f64,
    pub initial_step: f64,
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

impl NelderMead {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            x_tolerance: 1e-4,
            f_tolerance: 1e-8,
            initial_step: 0.1,
        }
    }

    pub fn minimize<F>(&self, objective: F, start: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let eval = |x: &[f64]| {
            let value = objective(x);
            if value.is_nan() {
                f64::INFINITY
            } else {
                value
            }
        };

        let dims = start.len();
        if dims == 0 {
            return Minimum {
                x: Vec::new(),
                value: eval(start),
                iterations: 0,
                converged: true,
            };
        }

        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(dims + 1);
        simplex.push(start.to_vec());
        for i in 0..dims {
            let mut vertex = start.to_vec();
            vertex[i] += if vertex[i] == 0.0 {
                self.initial_step
            } else {
                self.initial_step * vertex[i].abs()
            };
            simplex.push(vertex);
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            sort_simplex(&mut simplex, &mut values);

            if self.has_converged(&simplex, &values) {
                converged = true;
                break;
            }
            iterations += 1;

            let worst = dims;
            let centroid = centroid(&simplex[..worst]);

            let reflected = towards(&centroid, &simplex[worst], -REFLECTION);
            let f_reflected = eval(&reflected);

            if f_reflected < values[0] {
                let expanded = towards(&centroid, &reflected, EXPANSION);
                let f_expanded = eval(&expanded);
                if f_expanded < f_reflected {
                    simplex[worst] = expanded;
                    values[worst] = f_expanded;
                } else {
                    simplex[worst] = reflected;
                    values[worst] = f_reflected;
                }
                continue;
            }

            if f_reflected < values[worst - 1] {
                simplex[worst] = reflected;
                values[worst] = f_reflected;
                continue;
            }

            let (contracted, f_contracted, accept) = if f_reflected < values[worst] {
                let outside = towards(&centroid, &reflected, CONTRACTION);
                let f_outside = eval(&outside);
                (outside, f_outside, f_outside <= f_reflected)
            } else {
                let inside = towards(&centroid, &simplex[worst], CONTRACTION);
                let f_inside = eval(&inside);
                (inside, f_inside, f_inside < values[worst])
            };

            if accept {
                simplex[worst] = contracted;
                values[worst] = f_contracted;
                continue;
            }

            let best = simplex[0].clone();
            for idx in 1..=dims {
                simplex[idx] = towards(&best, &simplex[idx], SHRINK);
                values[idx] = eval(&simplex[idx]);
            }
        }

        sort_simplex(&mut simplex, &mut values);
        if !converged {
            converged = self.has_converged(&simplex, &values);
        }

        Minimum {
            x: simplex.swap_remove(0),
            value: values[0],
            iterations,
            converged,
        }
    }

    /// Converged once the simplex values agree to a relative tolerance or the
    /// vertices coincide; either test alone is enough.
    fn has_converged(&self, simplex: &[Vec<f64>], values: &[f64]) -> bool {
        if !values[0].is_finite() {
            return false;
        }
        let f_spread = values
            .iter()
            .skip(1)
            .map(|v| (v - values[0]).abs())
            .fold(0.0, f64::max);
        let x_spread = simplex
            .iter()
            .skip(1)
            .flat_map(|vertex| vertex.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        f_spread <= self.f_tolerance * (1.0 + values[0].abs()) || x_spread <= self.x_tolerance
    }
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

fn centroid(vertices: &[Vec<f64>]) -> Vec<f64> {
    let dims = vertices[0].len();
    let mut center = vec![0.0; dims];
    for vertex in vertices {
        for (c, v) in center.iter_mut().zip(vertex) {
            *c += v;
        }
    }
    let n = vertices.len() as f64;
    center.iter_mut().for_each(|c| *c /= n);
    center
}

/// `origin + scale * (target - origin)`.
fn towards(origin: &[f64], target: &[f64], scale: f64) -> Vec<f64> {
    origin
        .iter()
        .zip(target)
        .map(|(o, t)| o + scale * (t - o))
        .collect()
}
