/// Gumbel-softmax temperature at `iteration`:
/// `max(max_temp * exp(-rate * iteration), min_temp)`.
pub fn gumbel_softmax_decay(iteration: usize, rate: f64, max_temp: f64, min_temp: f64) -> f64 {
    let decayed = max_temp * (-rate * iteration as f64).exp();
    decayed.max(min_temp)
}
