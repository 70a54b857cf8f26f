use crate::bucketed_sum::BucketedSumCalculator;
use crate::catalog::{find_row, CalculatorFamily, CatalogRow, CATALOG};
use crate::composite::{Component, CompositeScoreCalculator};
use crate::concentration::ConcentrationCalculator;
use crate::error::AnalyticsError;
use crate::ratio::RatioCalculator;
use crate::weighted_average::WeightedAverageCalculator;
use crate::KpiCalculator;
use core_types::KpiDefinition;

/// Creates the calculator for one catalog row.
pub fn create_calculator(row: &CatalogRow) -> Result<Box<dyn KpiCalculator>, AnalyticsError> {
    let definition = row.definition();
    // An exhaustive match: adding a family without handling it here will not compile.
    match row.family {
        CalculatorFamily::Ratio { numerator, denominator, scale } => {
            Ok(Box::new(RatioCalculator::new(definition, numerator, denominator, scale)))
        }
        CalculatorFamily::WeightedAverage { value, weight } => {
            Ok(Box::new(WeightedAverageCalculator::new(definition, value, weight)))
        }
        CalculatorFamily::BucketedSum { amount, min_days_past_due } => {
            Ok(Box::new(BucketedSumCalculator::new(definition, amount, min_days_past_due)))
        }
        CalculatorFamily::Concentration { amount, top_n } => {
            Ok(Box::new(ConcentrationCalculator::new(definition, amount, top_n)))
        }
        CalculatorFamily::CompositeScore { components, scale } => {
            let components = components
                .iter()
                .map(|(name, weight)| {
                    let component_row = find_row(name)
                        .filter(|r| !matches!(r.family, CalculatorFamily::CompositeScore { .. }))
                        .ok_or_else(|| AnalyticsError::UnknownComponent {
                            composite: row.kpi_name.to_string(),
                            component: name.to_string(),
                        })?;
                    Ok(Component { weight: *weight, calculator: create_calculator(component_row)? })
                })
                .collect::<Result<Vec<_>, AnalyticsError>>()?;
            Ok(Box::new(CompositeScoreCalculator::new(definition, components, scale)))
        }
    }
}

/// The ordered set of calculators a run evaluates.
pub struct KpiRegistry {
    calculators: Vec<Box<dyn KpiCalculator>>,
}

impl KpiRegistry {
    pub fn new() -> Self {
        Self { calculators: Vec::new() }
    }

    /// Registers every KPI of the static catalog, in catalog order.
    pub fn from_catalog() -> Result<Self, AnalyticsError> {
        let mut registry = Self::new();
        for row in CATALOG {
            registry.register(create_calculator(row)?)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, calculator: Box<dyn KpiCalculator>) -> Result<(), AnalyticsError> {
        let name = &calculator.describe().kpi_name;
        if self.calculators.iter().any(|c| &c.describe().kpi_name == name) {
            return Err(AnalyticsError::DuplicateKpi(name.clone()));
        }
        self.calculators.push(calculator);
        Ok(())
    }

    pub fn calculators(&self) -> &[Box<dyn KpiCalculator>] {
        &self.calculators
    }

    pub fn into_calculators(self) -> Vec<Box<dyn KpiCalculator>> {
        self.calculators
    }

    pub fn definitions(&self) -> Vec<KpiDefinition> {
        self.calculators.iter().map(|c| c.describe().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.calculators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calculators.is_empty()
    }
}

impl Default for KpiRegistry {
    fn default() -> Self {
        Self::new()
    }
}
