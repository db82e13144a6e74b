use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::DataPaths;
use crate::error::{PipelineError, Result};

pub const ACCOUNT_KEY: &str = "mg_acc";
pub const FSA_KEY: &str = "FSA";

/// Columns the mortgage table must carry for the rest of the pipeline to run.
pub const MORTGAGE_COLUMNS: [&str; 9] = [
    ACCOUNT_KEY,
    FSA_KEY,
    "loan_size",
    "purchase_price",
    "origin_date",
    "property_type",
    "amort_period",
    "Sample",
    "default",
];

/// The three raw input tables, as read from disk.
#[derive(Debug, Clone)]
pub struct RawTables {
    pub customer: DataFrame,
    pub fsa: DataFrame,
    pub mortgage: DataFrame,
}

/// Counts of mortgage rows whose key found no partner on the right side.
/// Unmatched keys are tolerated; the joined columns are simply null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub mortgage_rows: usize,
    pub unmatched_customers: usize,
    pub unmatched_fsa: usize,
}

/// DataLoader reads the customer, FSA and mortgage CSV files
pub struct DataLoader {
    customer_path: PathBuf,
    fsa_path: PathBuf,
    mortgage_path: PathBuf,
}

impl DataLoader {
    pub fn new(paths: &DataPaths) -> Self {
        Self {
            customer_path: PathBuf::from(&paths.customer_path),
            fsa_path: PathBuf::from(&paths.fsa_path),
            mortgage_path: PathBuf::from(&paths.mortgage_path),
        }
    }

    /// Reads all three tables and checks that the join keys are present
    pub fn load_tables(&self) -> Result<RawTables> {
        let customer = read_csv(&self.customer_path)?;
        require_columns(&customer, &self.customer_path, &[ACCOUNT_KEY])?;

        let fsa = read_csv(&self.fsa_path)?;
        require_columns(&fsa, &self.fsa_path, &[FSA_KEY])?;

        let mortgage = read_csv(&self.mortgage_path)?;
        require_columns(&mortgage, &self.mortgage_path, &MORTGAGE_COLUMNS)?;

        info!(
            customers = customer.height(),
            fsa_areas = fsa.height(),
            mortgages = mortgage.height(),
            "Input tables loaded"
        );

        Ok(RawTables {
            customer,
            fsa,
            mortgage,
        })
    }
}

/// Reads a headered UTF-8 CSV file, inferring column types from every row.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let source_error = |reason: String| PipelineError::DataSource {
        path: path.display().to_string(),
        reason,
    };

    if !path.is_file() {
        return Err(source_error("file not found".to_string()));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| source_error(e.to_string()))?
        .finish()
        .map_err(|e| source_error(e.to_string()))?;

    debug!(path = %path.display(), shape = ?df.shape(), "CSV read");
    Ok(df)
}

fn require_columns(df: &DataFrame, path: &Path, columns: &[&str]) -> Result<()> {
    for name in columns {
        if df.get_column_index(name).is_none() {
            return Err(PipelineError::DataSource {
                path: path.display().to_string(),
                reason: format!("required column '{}' is missing", name),
            });
        }
    }
    Ok(())
}

/// Left-joins mortgages with customers on `mg_acc`, then with FSA areas on `FSA`.
///
/// The result has exactly one row per mortgage row.
pub fn join_tables(tables: &RawTables) -> Result<(DataFrame, JoinReport)> {
    let mortgage_rows = tables.mortgage.height();

    let customer = align_key(&tables.mortgage, &tables.customer, ACCOUNT_KEY)?;
    ensure_unique_keys(&customer, "customer", ACCOUNT_KEY)?;
    let unmatched_customers = count_unmatched(&tables.mortgage, &customer, ACCOUNT_KEY)?;

    let fsa = align_key(&tables.mortgage, &tables.fsa, FSA_KEY)?;
    ensure_unique_keys(&fsa, "fsa", FSA_KEY)?;
    let unmatched_fsa = count_unmatched(&tables.mortgage, &fsa, FSA_KEY)?;

    let joined = tables
        .mortgage
        .clone()
        .lazy()
        .join(
            customer.lazy(),
            [col(ACCOUNT_KEY)],
            [col(ACCOUNT_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            fsa.lazy(),
            [col(FSA_KEY)],
            [col(FSA_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    if joined.height() != mortgage_rows {
        return Err(PipelineError::Schema(format!(
            "joined table has {} rows but the mortgage table has {}",
            joined.height(),
            mortgage_rows
        )));
    }

    let report = JoinReport {
        mortgage_rows,
        unmatched_customers,
        unmatched_fsa,
    };
    if report.unmatched_customers > 0 || report.unmatched_fsa > 0 {
        warn!(
            unmatched_customers = report.unmatched_customers,
            unmatched_fsa = report.unmatched_fsa,
            "Some mortgage rows found no join partner; their joined columns are null"
        );
    }
    debug!(shape = ?joined.shape(), "Tables joined");

    Ok((joined, report))
}

/// Casts the right table's key to the dtype of the left table's key.
fn align_key(left: &DataFrame, right: &DataFrame, key: &str) -> Result<DataFrame> {
    let left_dtype = left.column(key)?.dtype().clone();
    if right.column(key)?.dtype() == &left_dtype {
        return Ok(right.clone());
    }
    debug!(key, dtype = ?left_dtype, "Casting join key");
    Ok(right
        .clone()
        .lazy()
        .with_column(col(key).cast(left_dtype))
        .collect()?)
}

fn ensure_unique_keys(df: &DataFrame, table: &str, key: &str) -> Result<()> {
    let keys = df.column(key)?.as_materialized_series().drop_nulls();
    let duplicated = is_duplicated(&keys)?;
    let first_duplicate = duplicated.into_iter().position(|d| d == Some(true));
    match first_duplicate {
        Some(row) => Err(PipelineError::DuplicateKey {
            table: table.to_string(),
            key: keys.str_value(row)?.to_string(),
        }),
        None => Ok(()),
    }
}

/// Left rows whose key has no partner on the right, found with an anti join.
/// A null key never matches.
fn count_unmatched(left: &DataFrame, right: &DataFrame, key: &str) -> Result<usize> {
    let unmatched = left
        .clone()
        .lazy()
        .select([col(key)])
        .join(
            right.clone().lazy().select([col(key)]),
            [col(key)],
            [col(key)],
            JoinArgs::new(JoinType::Anti),
        )
        .collect()?;
    Ok(unmatched.height())
}

/// Reads any column as optional strings, whatever its dtype.
pub fn column_strings(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}
