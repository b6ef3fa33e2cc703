//! The disaggregation engine: bin edges, rupture contributions, matrix
//! arrangement, PMF projections and the keyed map-reduce over sources.

pub mod arrange;
pub mod collect;
pub mod driver;
pub mod edges;
pub mod io;
pub mod matrix;
pub mod pmf;
pub mod reduce;

pub use collect::{CollectContext, collect_contributions};
pub use driver::{DisaggRun, SourceModel, build_edges, run_disaggregation, validate_job};
pub use edges::{BinEdges, EdgesByKey, build_bin_edges};
pub use io::{DisaggInputs, NpzResultStore, ResultStore, load_inputs};
pub use matrix::DisaggMatrix;
pub use pmf::{PmfKind, pmf_map, project};
pub use reduce::{DisaggResults, MapReduce, Poe, RayonMapReduce, ResultKey, SequentialMapReduce};
