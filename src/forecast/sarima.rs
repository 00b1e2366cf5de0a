//! Seasonal ARIMA, `(p,d,q)(P,D,Q)[s]`.
//!
//! The series is differenced with `(1-B)^d (1-B^s)^D` and a multiplicative
//! ARMA model is fitted to the result by exact Gaussian maximum likelihood.
//! Autocovariances of the candidate model feed a Durbin–Levinson pass that
//! yields one-step prediction errors and their variances, so the seasonal lags
//! are informed by every observed pair of points rather than only the ones a
//! conditional recursion can reach. The concentrated negative log-likelihood
//! is minimized with Nelder–Mead.
//!
//! Each AR and MA polynomial is parameterized through its partial
//! autocorrelations (mapped into (-1, 1) and expanded with the Durbin–Levinson
//! recursion), so every candidate the optimizer visits is stationary and
//! invertible.
//!
//! Forecasts are the best linear predictor of the differenced future given the
//! differenced sample, integrated back through the differencing polynomial.
//! Standard errors combine the conditional covariance of those predictions
//! with the psi weights of the differencing polynomial.

use crate::config::{ArimaOrder, SeasonalOrder};
use crate::error::{PipelineError, Result};
use crate::forecast::optimizer::NelderMead;

/// Weight of a Gaussian prior on the unconstrained parameters. Directions the
/// data barely inform stay near white noise.
const PRIOR_WEIGHT: f64 = 0.1;
/// Pivots smaller than this make a linear system singular.
const SINGULAR_PIVOT: f64 = 1e-12;
/// Differenced series with less energy than this are fitted exactly.
const ZERO_ENERGY: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SeasonalArima {
    order: ArimaOrder,
    seasonal: SeasonalOrder,
    period: usize,
    max_iterations: usize,
    fitted: Option<FittedState>,
}

#[derive(Debug, Clone)]
struct FittedState {
    coefficients: Coefficients,
    sigma2: f64,
    history: Vec<f64>,
    differenced: Vec<f64>,
    iterations: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coefficients {
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub seasonal_ma: Vec<f64>,
}

impl SeasonalArima {
    pub fn new(
        order: ArimaOrder,
        seasonal: SeasonalOrder,
        period: usize,
        max_iterations: usize,
    ) -> Result<Self> {
        if !seasonal.is_none() && period < 2 {
            return Err(PipelineError::Configuration(format!(
                "seasonal period must be at least 2, got {period}"
            )));
        }
        if order.d > 2 || seasonal.d > 1 {
            return Err(PipelineError::Configuration(
                "differencing orders are limited to d <= 2 and D <= 1".to_string(),
            ));
        }
        Ok(Self {
            order,
            seasonal,
            period: if seasonal.is_none() { 0 } else { period },
            max_iterations,
            fitted: None,
        })
    }

    pub fn non_seasonal(order: ArimaOrder, max_iterations: usize) -> Result<Self> {
        Self::new(order, SeasonalOrder::NONE, 0, max_iterations)
    }

    pub fn label(&self) -> String {
        let ArimaOrder { p, d, q } = self.order;
        if self.seasonal.is_none() {
            format!("ARIMA({p},{d},{q})")
        } else {
            let SeasonalOrder {
                p: sp,
                d: sd,
                q: sq,
            } = self.seasonal;
            format!("SARIMA({p},{d},{q})({sp},{sd},{sq})[{}]", self.period)
        }
    }

    fn parameter_count(&self) -> usize {
        self.order.p + self.order.q + self.seasonal.p + self.seasonal.q
    }

    /// Observations consumed by differencing.
    fn differencing_span(&self) -> usize {
        self.order.d + self.seasonal.d * self.period
    }

    /// Fewest observations that leave enough differenced points to estimate.
    pub fn minimum_observations(&self) -> usize {
        self.differencing_span() + self.parameter_count() + 3
    }

    pub fn fit(&mut self, data: &[f64]) -> Result<()> {
        let required = self.minimum_observations();
        if data.len() < required {
            return Err(PipelineError::InsufficientHistory {
                required,
                actual: data.len(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::ModelFit {
                iterations: 0,
                reason: "series contains non-finite values".to_string(),
            });
        }

        let diff = differencing_polynomial(self.order.d, self.seasonal.d, self.period);
        let differenced = apply_polynomial(&diff, data);
        let energy: f64 = differenced.iter().map(|w| w * w).sum();

        if energy <= ZERO_ENERGY {
            tracing::debug!(model = %self.label(), "differenced series is flat; exact fit");
            self.fitted = Some(FittedState {
                coefficients: self.unpack(&vec![0.0; self.parameter_count()]),
                sigma2: 0.0,
                history: data.to_vec(),
                differenced,
                iterations: 0,
            });
            return Ok(());
        }

        let objective = |x: &[f64]| {
            let (ar, ma) = self.polynomials(&self.unpack(x));
            let prior: f64 = x.iter().map(|v| v * v).sum::<f64>() * PRIOR_WEIGHT;
            exact_likelihood(&ar, &ma, &differenced)
                .map_or(f64::INFINITY, |(value, _)| value + prior)
        };

        let optimizer = NelderMead::new(self.max_iterations);
        let minimum = optimizer.minimize(objective, &vec![0.0; self.parameter_count()]);

        if !minimum.converged {
            return Err(PipelineError::ModelFit {
                iterations: minimum.iterations,
                reason: "likelihood optimizer did not converge".to_string(),
            });
        }
        if !minimum.value.is_finite() {
            return Err(PipelineError::ModelFit {
                iterations: minimum.iterations,
                reason: "likelihood is not finite at the optimum".to_string(),
            });
        }

        let coefficients = self.unpack(&minimum.x);
        let (ar, ma) = self.polynomials(&coefficients);
        let (_, sigma2) =
            exact_likelihood(&ar, &ma, &differenced).ok_or_else(|| PipelineError::ModelFit {
                iterations: minimum.iterations,
                reason: "likelihood is undefined at the optimum".to_string(),
            })?;

        tracing::debug!(
            model = %self.label(),
            iterations = minimum.iterations,
            sigma2,
            ?coefficients,
            "fitted seasonal ARIMA"
        );

        self.fitted = Some(FittedState {
            coefficients,
            sigma2,
            history: data.to_vec(),
            differenced,
            iterations: minimum.iterations,
        });
        Ok(())
    }

    /// Point forecasts and their standard errors for the next `steps` periods.
    pub fn forecast(&self, steps: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        let state = self.fitted.as_ref().ok_or_else(|| {
            PipelineError::Configuration("forecast requested before fit".to_string())
        })?;
        if steps == 0 {
            return Ok((Vec::new(), Vec::new()));
        }

        let (ar, ma) = self.polynomials(&state.coefficients);
        let observed = &state.differenced;
        let m = observed.len();
        let singular = || PipelineError::ModelFit {
            iterations: state.iterations,
            reason: "fitted model has a singular covariance matrix".to_string(),
        };

        let gamma = autocovariances(&ar, &ma, m + steps).ok_or_else(singular)?;
        let sample_cov: Vec<Vec<f64>> = (0..m)
            .map(|i| (0..m).map(|j| gamma[i.abs_diff(j)]).collect())
            .collect();
        let factor = cholesky(&sample_cov).ok_or_else(singular)?;
        let weights = cholesky_solve(&factor, observed);

        // Covariance of each future differenced value with the sample.
        let cross: Vec<Vec<f64>> = (0..steps)
            .map(|h| (0..m).map(|i| gamma[m + h - i]).collect())
            .collect();
        let projected: Vec<Vec<f64>> = cross.iter().map(|c| cholesky_solve(&factor, c)).collect();
        let predicted: Vec<f64> = cross.iter().map(|c| dot(c, &weights)).collect();
        let error_cov: Vec<Vec<f64>> = (0..steps)
            .map(|h| {
                (0..steps)
                    .map(|k| gamma[h.abs_diff(k)] - dot(&cross[h], &projected[k]))
                    .collect()
            })
            .collect();

        let diff = differencing_polynomial(self.order.d, self.seasonal.d, self.period);
        let mut y = state.history.clone();
        for next_w in &predicted {
            let t = y.len();
            let mut next = *next_w;
            for (lag, coef) in nonzero_lags(&diff) {
                next -= coef * y[t - lag];
            }
            y.push(next);
        }
        let means = y[state.history.len()..].to_vec();

        let integration = psi_weights(&diff, &[1.0], steps);
        let std_errors = (0..steps)
            .map(|h| {
                let mut variance = 0.0;
                for i in 0..=h {
                    for j in 0..=h {
                        variance += integration[h - i] * integration[h - j] * error_cov[i][j];
                    }
                }
                (state.sigma2 * variance).max(0.0).sqrt()
            })
            .collect();

        Ok((means, std_errors))
    }

    pub fn coefficients(&self) -> Option<&Coefficients> {
        self.fitted.as_ref().map(|state| &state.coefficients)
    }

    pub fn sigma2(&self) -> Option<f64> {
        self.fitted.as_ref().map(|state| state.sigma2)
    }

    pub fn iterations(&self) -> Option<usize> {
        self.fitted.as_ref().map(|state| state.iterations)
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn unpack(&self, x: &[f64]) -> Coefficients {
        let (ar, rest) = x.split_at(self.order.p);
        let (ma, rest) = rest.split_at(self.order.q);
        let (seasonal_ar, seasonal_ma) = rest.split_at(self.seasonal.p);
        Coefficients {
            ar: stationary_coefficients(ar),
            ma: stationary_coefficients(ma).into_iter().map(|c| -c).collect(),
            seasonal_ar: stationary_coefficients(seasonal_ar),
            seasonal_ma: stationary_coefficients(seasonal_ma)
                .into_iter()
                .map(|c| -c)
                .collect(),
        }
    }

    /// Full AR and MA lag polynomials of the differenced series.
    fn polynomials(&self, c: &Coefficients) -> (Vec<f64>, Vec<f64>) {
        let ar = multiply(
            &lag_polynomial(&c.ar, 1, -1.0),
            &lag_polynomial(&c.seasonal_ar, self.period, -1.0),
        );
        let ma = multiply(
            &lag_polynomial(&c.ma, 1, 1.0),
            &lag_polynomial(&c.seasonal_ma, self.period, 1.0),
        );
        (ar, ma)
    }
}

/// Maps unconstrained values to the coefficients of a stationary polynomial
/// `1 - φ1 B - ... - φp B^p` via partial autocorrelations.
fn stationary_coefficients(unconstrained: &[f64]) -> Vec<f64> {
    let mut phi: Vec<f64> = Vec::with_capacity(unconstrained.len());
    for (k, x) in unconstrained.iter().enumerate() {
        let partial = x / (1.0 + x * x).sqrt();
        let previous = phi.clone();
        phi.push(partial);
        for j in 0..k {
            phi[j] = previous[j] - partial * previous[k - 1 - j];
        }
    }
    phi
}

/// `1 + sign * (c1 B^step + c2 B^{2 step} + ...)`.
fn lag_polynomial(coefficients: &[f64], step: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coefficients.len() * step + 1];
    poly[0] = 1.0;
    for (i, c) in coefficients.iter().enumerate() {
        poly[(i + 1) * step] = sign * c;
    }
    poly
}

fn multiply(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut product = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        if *x == 0.0 {
            continue;
        }
        for (j, y) in b.iter().enumerate() {
            product[i + j] += x * y;
        }
    }
    product
}

/// `(1 - B)^d (1 - B^s)^D`.
fn differencing_polynomial(d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..d {
        poly = multiply(&poly, &[1.0, -1.0]);
    }
    for _ in 0..seasonal_d {
        poly = multiply(&poly, &lag_polynomial(&[1.0], period, -1.0));
    }
    poly
}

fn apply_polynomial(poly: &[f64], data: &[f64]) -> Vec<f64> {
    let span = poly.len() - 1;
    (span..data.len())
        .map(|t| {
            poly.iter()
                .enumerate()
                .map(|(lag, coef)| coef * data[t - lag])
                .sum()
        })
        .collect()
}

fn nonzero_lags(poly: &[f64]) -> impl Iterator<Item = (usize, f64)> + '_ {
    poly.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, coef)| **coef != 0.0)
        .map(|(lag, coef)| (lag, *coef))
}

/// Autocovariances `γ(0), ..., γ(count - 1)` of `ar(B) w_t = ma(B) e_t` with
/// unit innovation variance. The first `p + 1` lags solve a linear system; the
/// rest follow the AR recursion.
fn autocovariances(ar: &[f64], ma: &[f64], count: usize) -> Option<Vec<f64>> {
    let p = ar.len() - 1;
    let q = ma.len() - 1;
    let psi = psi_weights(ar, ma, q + 1);
    let forcing: Vec<f64> = (0..=q)
        .map(|k| (k..=q).map(|j| ma[j] * psi[j - k]).sum())
        .collect();
    let forcing_at = |k: usize| forcing.get(k).copied().unwrap_or(0.0);

    let mut gamma = if p == 0 {
        vec![forcing_at(0)]
    } else {
        let mut system = vec![vec![0.0; p + 1]; p + 1];
        for (k, row) in system.iter_mut().enumerate() {
            row[k] += 1.0;
            for (lag, coef) in nonzero_lags(ar) {
                row[k.abs_diff(lag)] += coef;
            }
        }
        solve_linear(system, (0..=p).map(forcing_at).collect())?
    };
    while gamma.len() < count {
        let k = gamma.len();
        let mut value = forcing_at(k);
        for (lag, coef) in nonzero_lags(ar) {
            value -= coef * gamma[k - lag];
        }
        gamma.push(value);
    }
    gamma.truncate(count.max(1));
    gamma.iter().all(|g| g.is_finite()).then_some(gamma)
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(mut matrix: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))?;
        if matrix[pivot][col].abs() < SINGULAR_PIVOT {
            return None;
        }
        matrix.swap(col, pivot);
        rhs.swap(col, pivot);
        let pivot_row = matrix[col].clone();
        for row in col + 1..n {
            let factor = matrix[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for (cell, above) in matrix[row].iter_mut().zip(&pivot_row).skip(col) {
                *cell -= factor * above;
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|c| matrix[row][c] * x[c]).sum();
        x[row] = (rhs[row] - tail) / matrix[row][row];
    }
    Some(x)
}

/// Concentrated exact negative log-likelihood of `w` and the innovation
/// variance that maximizes it.
fn exact_likelihood(ar: &[f64], ma: &[f64], w: &[f64]) -> Option<(f64, f64)> {
    let m = w.len() as f64;
    let gamma = autocovariances(ar, ma, w.len())?;
    let (scaled_sse, log_det) = durbin_levinson(&gamma, w)?;
    let sigma2 = scaled_sse / m;
    let value = 0.5 * m * sigma2.max(f64::MIN_POSITIVE).ln() + 0.5 * log_det;
    value.is_finite().then_some((value, sigma2))
}

/// One-step prediction errors of `w` from its autocovariances. Returns the sum
/// of squared errors scaled by their variances and the sum of log variances.
fn durbin_levinson(gamma: &[f64], w: &[f64]) -> Option<(f64, f64)> {
    let mut variance = gamma[0];
    if variance.is_nan() || variance <= 0.0 {
        return None;
    }
    let mut phi: Vec<f64> = Vec::with_capacity(w.len());
    let mut scaled_sse = w[0] * w[0] / variance;
    let mut log_det = variance.ln();

    for t in 1..w.len() {
        let explained: f64 = phi
            .iter()
            .enumerate()
            .map(|(i, c)| c * gamma[t - 1 - i])
            .sum();
        let partial = (gamma[t] - explained) / variance;
        let previous = phi.clone();
        for (i, c) in phi.iter_mut().enumerate() {
            *c = previous[i] - partial * previous[t - 2 - i];
        }
        phi.push(partial);

        variance *= 1.0 - partial * partial;
        if !variance.is_finite() || variance <= 0.0 {
            return None;
        }
        let prediction: f64 = phi.iter().enumerate().map(|(i, c)| c * w[t - 1 - i]).sum();
        let error = w[t] - prediction;
        scaled_sse += error * error / variance;
        log_det += variance.ln();
    }
    Some((scaled_sse, log_det))
}

/// Lower triangular `L` with `L Lᵀ = matrix`, or `None` if the matrix is not
/// positive definite.
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let partial: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            let value = matrix[i][j] - partial;
            if i == j {
                if value.is_nan() || value <= 0.0 {
                    return None;
                }
                lower[i][i] = value.sqrt();
            } else {
                let diagonal = lower[j][j];
                lower[i][j] = value / diagonal;
            }
        }
    }
    Some(lower)
}

fn cholesky_solve(lower: &[Vec<f64>], rhs: &[f64]) -> Vec<f64> {
    let n = rhs.len();
    let mut forward = vec![0.0; n];
    for i in 0..n {
        let partial: f64 = (0..i).map(|k| lower[i][k] * forward[k]).sum();
        forward[i] = (rhs[i] - partial) / lower[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let partial: f64 = (i + 1..n).map(|k| lower[k][i] * x[k]).sum();
        x[i] = (forward[i] - partial) / lower[i][i];
    }
    x
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// First `count` psi weights of `ar(B)^-1 ma(B)`.
fn psi_weights(ar: &[f64], ma: &[f64], count: usize) -> Vec<f64> {
    let mut psi = Vec::with_capacity(count);
    for j in 0..count {
        if j == 0 {
            psi.push(1.0);
            continue;
        }
        let mut value = ma.get(j).copied().unwrap_or(0.0);
        for i in 1..=j.min(ar.len() - 1) {
            value -= ar[i] * psi[j - i];
        }
        psi.push(value);
    }
    psi
}
