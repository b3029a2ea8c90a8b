//! Profit breakdown for dashboard and campaign statistics.

/// Round to cents; all reported money figures go through this.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProfitMetrics {
    pub(crate) total_revenue: f64,
    pub(crate) net_profit: f64,
    pub(crate) investor_profit: f64,
    pub(crate) admin_profit: f64,
    pub(crate) roi: f64,
}

/// Pure breakdown of campaign revenue into investor and admin shares.
/// `percent` is the investor's share of net profit; `roi` is net profit over
/// budget, zero when there is no budget to relate it to.
pub(crate) fn calc_profit_metrics(total_revenue: f64, budget: f64, percent: f64) -> ProfitMetrics {
    let net_profit = total_revenue - budget;
    let investor_profit = net_profit * percent / 100.0;
    let admin_profit = net_profit - investor_profit;
    let roi = if budget > 0.0 {
        net_profit / budget * 100.0
    } else {
        0.0
    };

    ProfitMetrics {
        total_revenue: round2(total_revenue),
        net_profit: round2(net_profit),
        investor_profit: round2(investor_profit),
        admin_profit: round2(admin_profit),
        roi: round2(roi),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_profit_by_percent() {
        let metrics = calc_profit_metrics(1500.0, 1000.0, 40.0);
        assert_eq!(metrics.total_revenue, 1500.0);
        assert_eq!(metrics.net_profit, 500.0);
        assert_eq!(metrics.investor_profit, 200.0);
        assert_eq!(metrics.admin_profit, 300.0);
        assert_eq!(metrics.roi, 50.0);
    }

    #[test]
    fn shares_sum_to_net_profit() {
        let metrics = calc_profit_metrics(1234.56, 789.01, 33.0);
        let sum = metrics.investor_profit + metrics.admin_profit;
        assert!((sum - metrics.net_profit).abs() < 0.011);
    }

    #[test]
    fn losses_split_like_profits() {
        let metrics = calc_profit_metrics(500.0, 1000.0, 50.0);
        assert_eq!(metrics.net_profit, -500.0);
        assert_eq!(metrics.investor_profit, -250.0);
        assert_eq!(metrics.admin_profit, -250.0);
        assert_eq!(metrics.roi, -50.0);
    }

    #[test]
    fn zero_budget_means_zero_roi() {
        let metrics = calc_profit_metrics(100.0, 0.0, 25.0);
        assert_eq!(metrics.roi, 0.0);
        assert_eq!(metrics.net_profit, 100.0);
    }

    #[test]
    fn figures_are_rounded_to_cents() {
        let metrics = calc_profit_metrics(10.006, 0.0, 33.333);
        assert_eq!(metrics.total_revenue, 10.01);
        assert_eq!(round2(1.004), 1.0);
        assert_eq!(round2(1.006), 1.01);
    }
}
