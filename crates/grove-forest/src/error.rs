use std::path::PathBuf;

/// Errors from forest training, merging, prediction and persistence.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when num_trees is zero.
    #[error("num_trees must be at least 1, got {num_trees}")]
    InvalidTreeCount {
        /// The invalid num_trees value provided.
        num_trees: usize,
    },

    /// Returned when ci_group_size is zero.
    #[error("ci_group_size must be at least 1, got {ci_group_size}")]
    InvalidCiGroupSize {
        /// The invalid ci_group_size value provided.
        ci_group_size: usize,
    },

    /// Returned when CI groups are enabled and num_trees is not a multiple of the group size.
    #[error("num_trees ({num_trees}) must be a multiple of ci_group_size ({ci_group_size})")]
    TreesNotDivisibleByCiGroup {
        /// The requested number of trees.
        num_trees: usize,
        /// The requested CI group size.
        ci_group_size: usize,
    },

    /// Returned when sample_fraction is outside its valid range.
    #[error("sample_fraction must be in (0.0, {upper}], got {fraction}")]
    InvalidSampleFraction {
        /// The invalid sample_fraction value provided.
        fraction: f64,
        /// Inclusive upper bound for the current ci_group_size.
        upper: f64,
    },

    /// Returned when mtry is zero or exceeds the number of split variables.
    #[error("mtry must be in [1, {num_variables}], got {mtry}")]
    InvalidMtry {
        /// The invalid mtry value provided.
        mtry: usize,
        /// Number of columns available for splitting.
        num_variables: usize,
    },

    /// Returned when min_node_size is zero.
    #[error("min_node_size must be at least 1, got {min_node_size}")]
    InvalidMinNodeSize {
        /// The invalid min_node_size value provided.
        min_node_size: usize,
    },

    /// Returned when honesty is enabled and honesty_fraction is not in (0.0, 1.0).
    #[error("honesty_fraction must be in (0.0, 1.0), got {fraction}")]
    InvalidHonestyFraction {
        /// The invalid honesty_fraction value provided.
        fraction: f64,
    },

    /// Returned when alpha is not in [0.0, 0.25).
    #[error("alpha must be in [0.0, 0.25), got {alpha}")]
    InvalidAlpha {
        /// The invalid alpha value provided.
        alpha: f64,
    },

    /// Returned when imbalance_penalty is negative or not finite.
    #[error("imbalance_penalty must be a non-negative finite number, got {penalty}")]
    InvalidImbalancePenalty {
        /// The invalid penalty value provided.
        penalty: f64,
    },

    /// Returned when the cluster list does not have one entry per row.
    #[error("clusters has {got} entries, expected one per row ({expected})")]
    ClusterCountMismatch {
        /// Number of rows in the data.
        expected: usize,
        /// Number of cluster ids supplied.
        got: usize,
    },

    /// Returned when a quantile forest is configured with an unusable quantile list.
    #[error("quantiles must be non-empty, strictly increasing and inside (0.0, 1.0), got {quantiles:?}")]
    InvalidQuantiles {
        /// The rejected quantile levels.
        quantiles: Vec<f64>,
    },

    /// Returned when the training dataset has zero rows.
    #[error("training dataset has zero rows")]
    EmptyDataset,

    /// Returned when training starts before an outcome column was designated.
    #[error("no outcome column has been set on the data")]
    OutcomeNotSet,

    /// Returned when a treatment-based flavor runs without a treatment column.
    #[error("no treatment column has been set on the data")]
    TreatmentNotSet,

    /// Returned when an instrumental flavor runs without an instrument column.
    #[error("no instrument column has been set on the data")]
    InstrumentNotSet,

    /// Returned when a column index does not exist in the data.
    #[error("column {index} is out of range for data with {num_cols} columns")]
    ColumnOutOfRange {
        /// The requested column.
        index: usize,
        /// Number of columns in the data.
        num_cols: usize,
    },

    /// Returned when the value buffer does not match the declared shape.
    #[error("data buffer holds {got} values, expected {num_rows} x {num_cols}")]
    DataShapeMismatch {
        /// Declared row count.
        num_rows: usize,
        /// Declared column count.
        num_cols: usize,
        /// Actual number of values.
        got: usize,
    },

    /// Returned when a row has a different number of columns than the first row.
    #[error("row {row} has {got} columns, expected {expected}")]
    RaggedRow {
        /// Zero-based index of the offending row.
        row: usize,
        /// Column count of the first row.
        expected: usize,
        /// Column count of the offending row.
        got: usize,
    },

    /// Returned when a variance estimate is requested from a forest without CI groups.
    #[error("variance estimates need ci_group_size > 1, forest has {ci_group_size}")]
    VarianceRequiresCiGroups {
        /// The forest's CI group size.
        ci_group_size: usize,
    },

    /// Returned when the worker pool cannot be created.
    #[error("failed to build a pool of {num_threads} worker threads")]
    ThreadPool {
        /// Requested worker count.
        num_threads: usize,
        /// The underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },

    /// Returned when `Forest::merge` is given no forests.
    #[error("cannot merge an empty list of forests")]
    EmptyMerge,

    /// Returned when forests to merge disagree on their shape.
    #[error(
        "forest {index} is incompatible: split variables {split_variables:?} vs \
         {expected_split_variables:?}, training rows {num_samples} vs {expected_num_samples}, \
         ci_group_size {ci_group_size} vs {expected_ci_group_size}"
    )]
    IncompatibleForests {
        /// Position of the offending forest in the merge input.
        index: usize,
        /// Split variable columns of the first forest.
        expected_split_variables: Vec<usize>,
        /// Split variable columns of the offending forest.
        split_variables: Vec<usize>,
        /// Training row count of the first forest.
        expected_num_samples: usize,
        /// Training row count of the offending forest.
        num_samples: usize,
        /// `ci_group_size` of the first forest.
        expected_ci_group_size: usize,
        /// `ci_group_size` of the offending forest.
        ci_group_size: usize,
    },

    /// Returned when prediction data has a different number of split variables.
    #[error("prediction data has {got} variables, forest was trained on {expected}")]
    PredictionVariableMismatch {
        /// The forest's variable count.
        expected: usize,
        /// The variable count of the prediction data.
        got: usize,
    },

    /// Returned when the training data passed to prediction is not the data the forest was trained on.
    #[error("training data has {got} rows, forest was trained on {expected}")]
    TrainingRowMismatch {
        /// Row count recorded in the forest.
        expected: usize,
        /// Row count of the supplied training data.
        got: usize,
    },

    /// Returned when forest serialization fails.
    #[error("failed to serialize forest")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when forest deserialization fails.
    #[error("failed to deserialize forest from {path}")]
    DeserializeModel {
        /// Path to the forest file that could not be deserialized.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when a decoded forest violates the structure training guarantees.
    #[error("corrupt forest in {path}: {reason}")]
    CorruptModel {
        /// Path to the forest file.
        path: PathBuf,
        /// The first defect found.
        reason: String,
    },

    /// Returned when writing the forest file fails.
    #[error("failed to write forest to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the forest file fails.
    #[error("failed to read forest from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a forest with an incompatible format version.
    #[error("incompatible forest version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The format version this build expects.
        expected: u32,
        /// The format version found in the file.
        found: u32,
        /// Path to the forest file with the incompatible version.
        path: PathBuf,
    },
}
