// 外部系統的具體實作：HTTP 服務與命令列工具

pub mod ncbi;
pub mod opentree;
pub mod tools;
pub mod treebase;

pub use ncbi::NcbiBlastClient;
pub use opentree::OpenTreeClient;
pub use tools::{MafftAligner, RaxmlEstimator};
pub use treebase::TreeBaseClient;
