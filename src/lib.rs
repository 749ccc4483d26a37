pub mod cases;
pub mod context;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod merge;
pub mod month;
pub mod normalize;
pub mod output;
pub mod population;
pub mod publish;
pub mod reconcile;
pub mod scale;
pub mod style;

pub use cases::{CaseDataset, CaseRecord, IncidenceSource, RowIssue};
pub use context::{ContextOptions, MapContext, MonthView, RenderRequest};
pub use error::{MapError, Result};
pub use geo::{DistrictFeature, GeoDataset};
pub use merge::{DuplicatePolicy, MergedView, merge_month};
pub use month::YearMonth;
pub use normalize::normalize_district;
pub use population::PopulationTable;
pub use scale::{ColorScale, ColorScales, Metric};
