//! Mean and linear trend removal

/// Subtract the arithmetic mean
pub fn demean(data: &mut [f64]) {
    if data.is_empty() {
        return;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    for x in data.iter_mut() {
        *x -= mean;
    }
}

/// Subtract the least-squares line fitted over sample index
pub fn linear(data: &mut [f64]) {
    let n = data.len();
    if n < 2 {
        demean(data);
        return;
    }

    let x_mean = (n as f64 - 1.0) / 2.0;
    let y_mean = data.iter().sum::<f64>() / n as f64;

    let (mut sxx, mut sxy) = (0.0, 0.0);
    for (i, y) in data.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxx += dx * dx;
        sxy += dx * (y - y_mean);
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    for (i, y) in data.iter_mut().enumerate() {
        *y -= intercept + slope * i as f64;
    }
}

/// Apply a cosine (Tukey) taper to `fraction` of the samples at each end
pub fn cosine_taper(data: &mut [f64], fraction: f64) {
    let n = data.len();
    let width = ((n as f64) * fraction).floor() as usize;
    if width == 0 {
        return;
    }
    for i in 0..width {
        let w = 0.5 * (1.0 - (std::f64::consts::PI * i as f64 / width as f64).cos());
        data[i] *= w;
        data[n - 1 - i] *= w;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demean() {
        let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        demean(&mut data);
        assert_eq!(data, vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
        assert!(data.iter().sum::<f64>().abs() < 1e-12);
    }

    #[test]
    fn test_linear_removes_ramp() {
        let mut data: Vec<f64> = (0..100).map(|i| 3.0 + 0.25 * i as f64).collect();
        linear(&mut data);
        assert!(data.iter().all(|x| x.abs() < 1e-9));
    }

    #[test]
    fn test_linear_keeps_residual() {
        let wiggle = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let mut data: Vec<f64> = wiggle
            .iter()
            .enumerate()
            .map(|(i, w)| 10.0 - 2.0 * i as f64 + w)
            .collect();
        linear(&mut data);
        // The fit also absorbs the wiggle's own small trend; signs survive
        for (x, w) in data.iter().zip(wiggle) {
            assert_eq!(x.signum(), w);
        }
    }

    #[test]
    fn test_short_input() {
        let mut empty: Vec<f64> = vec![];
        demean(&mut empty);
        linear(&mut empty);

        let mut one = vec![7.0];
        linear(&mut one);
        assert_eq!(one, vec![0.0]);
    }

    #[test]
    fn test_cosine_taper() {
        let mut data = vec![1.0; 100];
        cosine_taper(&mut data, 0.1);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[99], 0.0);
        assert_eq!(data[50], 1.0);
        assert!(data[5] > 0.0 && data[5] < 1.0);
    }

    #[test]
    fn test_cosine_taper_width_per_end() {
        let mut data = vec![1.0; 400];
        cosine_taper(&mut data, 0.025);

        // 2.5% of 400 samples is 10 at each end
        assert!(data[9] < 1.0);
        assert_eq!(data[10], 1.0);
        assert_eq!(data[389], 1.0);
        assert!(data[390] < 1.0);
    }
}
