use ndarray::Array2;
use polars::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::data_loader::{column_strings, ACCOUNT_KEY, FSA_KEY};
use crate::error::{PipelineError, Result};

pub const RATIO_COLUMN: &str = "LTR";
pub const DATE_COLUMN: &str = "origin_date";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TARGET_COLUMN: &str = "default";
pub const SAMPLE_COLUMN: &str = "Sample";
pub const MISSING_CATEGORY: &str = "NA";

/// Columns that never enter the feature matrix: join keys, identifiers,
/// demographics and the target.
pub const EXCLUDED_COLUMNS: [&str; 7] = [
    ACCOUNT_KEY,
    FSA_KEY,
    TARGET_COLUMN,
    SAMPLE_COLUMN,
    "cust_age",
    "cust_gender",
    DATE_COLUMN,
];

/// What feature engineering flagged or produced along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureReport {
    /// Rows whose loan size was zero or missing; their ratio is null.
    pub flagged_ratios: usize,
    /// Indicator columns added by one-hot encoding, in creation order.
    pub indicator_columns: Vec<String>,
}

/// A dense, row-major numeric matrix with named columns. Missing values are NaN.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn select_rows(&self, indices: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            names: self.names.clone(),
            values: self.values.select(ndarray::Axis(0), indices),
        }
    }

    /// Reorders columns to match `names`. Columns absent here are filled with
    /// 0.0, which is the right value for an indicator of an unseen category.
    pub fn align_to(&self, names: &[String]) -> FeatureMatrix {
        let positions: Vec<Option<usize>> = names
            .iter()
            .map(|name| self.names.iter().position(|n| n == name))
            .collect();
        let values = Array2::from_shape_fn((self.n_rows(), names.len()), |(i, j)| {
            positions[j].map_or(0.0, |src| self.values[[i, src]])
        });
        FeatureMatrix {
            names: names.to_vec(),
            values,
        }
    }
}

/// Purchase price over loan size. `None` flags a zero, non-finite or missing
/// denominator instead of producing an infinity.
pub fn loan_to_value(purchase_price: Option<f64>, loan_size: Option<f64>) -> Option<f64> {
    match (purchase_price, loan_size) {
        (Some(price), Some(loan)) if loan != 0.0 && loan.is_finite() && price.is_finite() => {
            Some(price / loan)
        }
        _ => None,
    }
}

pub struct FeatureEngineer {
    categorical_columns: Vec<String>,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(&["property_type", "amort_period"])
    }
}

impl FeatureEngineer {
    pub fn new(categorical_columns: &[&str]) -> Self {
        Self {
            categorical_columns: categorical_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Adds the ratio column, parses origination dates and one-hot encodes the
    /// categorical columns of the joined table.
    pub fn engineer(&self, joined: DataFrame) -> Result<(DataFrame, FeatureReport)> {
        let (df, flagged_ratios) = add_loan_to_value(joined)?;
        let df = parse_origin_dates(df)?;
        let columns: Vec<&str> = self.categorical_columns.iter().map(String::as_str).collect();
        let (df, indicator_columns) = one_hot_encode(df, &columns)?;

        info!(
            shape = ?df.shape(),
            flagged_ratios,
            indicators = indicator_columns.len(),
            "Features engineered"
        );
        Ok((
            df,
            FeatureReport {
                flagged_ratios,
                indicator_columns,
            },
        ))
    }
}

/// Appends the `LTR` column and returns how many rows were flagged.
///
/// `purchase_price` and `loan_size` are replaced by their parsed Float64 form;
/// a value that is present but not a number is a parse error.
pub fn add_loan_to_value(mut df: DataFrame) -> Result<(DataFrame, usize)> {
    let prices = parse_numeric(&df, "purchase_price")?;
    let loans = parse_numeric(&df, "loan_size")?;

    let ratios: Vec<Option<f64>> = prices
        .f64()?
        .into_iter()
        .zip(loans.f64()?)
        .map(|(price, loan)| loan_to_value(price, loan))
        .collect();
    let flagged = ratios.iter().filter(|r| r.is_none()).count();
    if flagged > 0 {
        warn!(flagged, "Zero or missing loan size; ratio left null for these rows");
    }

    df.with_column(prices)?;
    df.with_column(loans)?;
    df.with_column(Series::new(RATIO_COLUMN.into(), ratios))?;
    Ok((df, flagged))
}

/// Casts a column to Float64, rejecting values the cast turned into nulls.
fn parse_numeric(df: &DataFrame, name: &str) -> Result<Series> {
    let raw = df.column(name)?.as_materialized_series();
    let parsed = raw.cast(&DataType::Float64)?;
    let failed = raw.is_not_null() & parsed.is_null();
    if let Some(row) = failed.into_iter().position(|f| f == Some(true)) {
        return Err(PipelineError::Parse {
            column: name.to_string(),
            row,
            value: raw.str_value(row)?.to_string(),
        });
    }
    Ok(parsed)
}

/// Replaces `origin_date` with a parsed `Date` column.
pub fn parse_origin_dates(df: DataFrame) -> Result<DataFrame> {
    let raw = df
        .column(DATE_COLUMN)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    let parsed = df
        .lazy()
        .with_column(col(DATE_COLUMN).cast(DataType::String).str().to_date(
            StrptimeOptions {
                format: Some(DATE_FORMAT.into()),
                strict: false,
                exact: true,
                cache: true,
            },
        ))
        .collect()?;

    let dates = parsed.column(DATE_COLUMN)?.as_materialized_series();
    if let Some(row) = dates.is_null().into_iter().position(|missing| missing == Some(true)) {
        return Err(PipelineError::Parse {
            column: DATE_COLUMN.to_string(),
            row,
            value: raw.str()?.get(row).unwrap_or_default().to_string(),
        });
    }
    Ok(parsed)
}

/// Expands each column into one indicator per observed value, named
/// `<column>_<value>` in sorted order, and drops the original. A null value
/// gets its own `<column>_NA` indicator.
pub fn one_hot_encode(mut df: DataFrame, columns: &[&str]) -> Result<(DataFrame, Vec<String>)> {
    let mut added = Vec::new();
    for &column in columns {
        let filled = df
            .clone()
            .lazy()
            .select([col(column)
                .cast(DataType::String)
                .fill_null(lit(MISSING_CATEGORY))])
            .collect()?;
        let dummies = filled
            .column(column)?
            .as_materialized_series()
            .to_dummies(Some("_"), false)?;

        let mut names: Vec<String> = dummies
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        names.sort();
        debug!(column, levels = names.len(), "One-hot encoding");

        let dummies = dummies.select(names.iter().map(String::as_str))?;
        df = df.drop(column)?.hstack(dummies.get_columns())?;
        added.extend(names);
    }
    Ok((df, added))
}

/// Maps the two target levels, in sorted order, to 0 and 1.
pub fn encode_target(df: &DataFrame) -> Result<Vec<u8>> {
    let values = column_strings(df, TARGET_COLUMN)?;
    if let Some(row) = values.iter().position(Option::is_none) {
        return Err(PipelineError::Schema(format!(
            "target column '{}' is null at row {}",
            TARGET_COLUMN, row
        )));
    }
    let values: Vec<String> = values.into_iter().flatten().collect();
    let levels: BTreeSet<&str> = values.iter().map(String::as_str).collect();
    if levels.len() == 1 {
        return Err(PipelineError::Training(format!(
            "target column '{}' holds a single class",
            TARGET_COLUMN
        )));
    }
    if levels.is_empty() || levels.len() > 2 {
        return Err(PipelineError::Schema(format!(
            "target column '{}' must be binary, found {} levels",
            TARGET_COLUMN,
            levels.len()
        )));
    }
    let levels: Vec<&str> = levels.into_iter().collect();
    Ok(values
        .iter()
        .map(|v| if v == levels[0] { 0 } else { 1 })
        .collect())
}

/// Builds the numeric design matrix from every column that is not excluded.
pub fn feature_matrix(df: &DataFrame) -> Result<FeatureMatrix> {
    let mut names = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();

    for column in df.get_columns() {
        let name = column.name().to_string();
        if is_excluded(&name) {
            continue;
        }
        let dtype = column.dtype();
        if !(dtype.is_numeric() || dtype == &DataType::Boolean) {
            return Err(PipelineError::Schema(format!(
                "feature column '{}' has non-numeric type {}",
                name, dtype
            )));
        }
        let values = column_f64(df, &name)?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        names.push(name);
        columns.push(values);
    }

    let values = Array2::from_shape_fn((df.height(), names.len()), |(i, j)| columns[j][i]);
    debug!(rows = values.nrows(), features = values.ncols(), "Feature matrix built");
    Ok(FeatureMatrix { names, values })
}

fn is_excluded(name: &str) -> bool {
    let base = name.strip_suffix("_right").unwrap_or(name);
    EXCLUDED_COLUMNS.contains(&base)
}

/// Reads a column as optional floats. Booleans become 0.0/1.0.
pub fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}
