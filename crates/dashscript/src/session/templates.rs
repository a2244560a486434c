//! Built-in template scripts the console starts with.

use super::{ScriptSession, SessionId};

/// A built-in starter script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    /// Display name, also the source of the session id.
    pub name: &'static str,
    /// Script source.
    pub code: &'static str,
}

impl Template {
    /// Session id for this template: `template-<slug>`.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        let slug = self
            .name
            .split_whitespace()
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>()
            .join("-");
        SessionId::new(format!("template-{slug}"))
    }

    pub(crate) fn to_session(self) -> ScriptSession {
        ScriptSession {
            id: self.session_id(),
            name: self.name.to_string(),
            code: self.code.to_string(),
            is_template: true,
        }
    }
}

const QUICK_STATS: &str = r"// Quick Stats - Logs today's revenue and orders
const today = dataset.shopify[dataset.shopify.length - 1];
log('Today Revenue:', today.revenue);
log('Today Orders:', today.orders);
log('Today AOV:', today.aov);
log('Today ROAS:', (today.revenue / 100).toFixed(2));";

const REVENUE_FORECAST: &str = r"// Revenue Forecast - Runs forecast for 30 days
const recent = dataset.shopify.slice(-7);
const avgRevenue = recent.reduce((sum, d) => sum + d.revenue, 0) / 7;
const forecast = [];

for (let i = 0; i < 30; i++) {
  const day = new Date();
  day.setDate(day.getDate() + i);
  forecast.push({
    name: day.toISOString().slice(0, 10),
    revenue: Math.round(avgRevenue * (0.95 + Math.random() * 0.1))
  });
}

log('30-Day Revenue Forecast Generated');
addWidget({
  title: '30-Day Revenue Forecast',
  type: 'line',
  data: forecast,
  dataKeys: ['revenue'],
  description: 'Generated forecast based on last 7 days average'
});";

const CHANNEL_PERFORMANCE: &str = r"// Channel Performance - Compare all channels
const latest = (records) => records[records.length - 1] || {};
const channels = {
  Shopify: latest(dataset.shopify),
  Meta: latest(dataset.meta),
  Google: latest(dataset.google)
};

const data = Object.entries(channels).map(([name, day]) => ({
  name,
  revenue: day.revenue || day.conversionValue || 0,
  spend: day.spend || 0
}));

addWidget({
  title: 'Channel Performance Comparison',
  type: 'bar',
  data,
  dataKeys: ['revenue', 'spend'],
  description: 'Latest daily metrics across all channels'
});";

const ANOMALY_DETECTION: &str = r"// Anomaly Detection - Check for revenue drops
const recent = dataset.shopify.slice(-7);
const previous = dataset.shopify.slice(-14, -7);

const recentAvg = recent.reduce((sum, d) => sum + d.revenue, 0) / 7;
const prevAvg = previous.reduce((sum, d) => sum + d.revenue, 0) / 7;
const change = ((recentAvg / prevAvg - 1) * 100).toFixed(1);

log('Recent Week Avg Revenue:', recentAvg.toFixed(2));
log('Previous Week Avg Revenue:', prevAvg.toFixed(2));
log('Change:', change + '%');

if (recentAvg < prevAvg * 0.9) {
  log('WARNING: Revenue decline detected!');
  addInsight({
    severity: 'warning',
    title: 'Revenue Decline Alert',
    body: 'Revenue is down ' + Math.abs(change) + '% week-over-week'
  });
}";

const EXPORT_DATA: &str = r"// Export Data - Export the last 30 days as CSV
const rows = dataset.shopify.slice(-30).map(d => ({
  date: d.date,
  revenue: d.revenue,
  orders: d.orders,
  aov: d.aov,
  newCustomers: d.newCustomers
}));

log('Exporting ' + rows.length + ' days of Shopify data...');
exportData('csv');
log('Export complete');";

const TEMPLATES: [Template; 5] = [
    Template {
        name: "Quick Stats",
        code: QUICK_STATS,
    },
    Template {
        name: "Revenue Forecast",
        code: REVENUE_FORECAST,
    },
    Template {
        name: "Channel Performance",
        code: CHANNEL_PERFORMANCE,
    },
    Template {
        name: "Anomaly Detection",
        code: ANOMALY_DETECTION,
    },
    Template {
        name: "Export Data",
        code: EXPORT_DATA,
    },
];

/// The built-in templates, in display order.
#[must_use]
pub fn builtin_templates() -> &'static [Template] {
    &TEMPLATES
}
