//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means during fitting
pub const MIN_MU: f64 = 0.5;

/// Any |coefficient| above this stops IRLS (about log2(1e9) on the log2 scale)
pub const MAX_LFC_BETA: f64 = 30.0;

/// Linear predictor clamp preventing `exp` overflow
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// IRLS weight mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// Log density of an NB count parameterized by mean and size = 1/alpha
pub fn nb_log_density(y: f64, mu: f64, size: f64) -> f64 {
    if mu <= 0.0 || size <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * prob.ln() + y * (1.0 - prob).ln()
}
