// Domain layer: records, plan policy and ports (interfaces to external systems).

pub mod model;
pub mod plan;
pub mod ports;
