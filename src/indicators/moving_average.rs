/// Calculate Simple Moving Average (SMA) over the trailing `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Sign of the fast/slow SMA spread: 1 above, -1 below, 0 when equal
pub fn ma_crossover_sign(prices: &[f64], fast_period: usize, slow_period: usize) -> Option<i8> {
    let fast = calculate_sma(prices, fast_period)?;
    let slow = calculate_sma(prices, slow_period)?;

    Some(if fast > slow {
        1
    } else if fast < slow {
        -1
    } else {
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(calculate_sma(&prices, 5), Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(calculate_sma(&prices, 5).is_none());
    }

    #[test]
    fn test_crossover_sign() {
        let rising = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        assert_eq!(ma_crossover_sign(&rising, 2, 6), Some(1));

        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        assert_eq!(ma_crossover_sign(&falling, 2, 6), Some(-1));

        let flat = vec![100.0; 6];
        assert_eq!(ma_crossover_sign(&flat, 2, 6), Some(0));
    }
}
