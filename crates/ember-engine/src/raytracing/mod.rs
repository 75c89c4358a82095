//! Ray-tracing state objects, shader tables and acceleration-structure instances.

mod accel;
mod shader_table;
mod state_object;

pub use accel::AccelInstance;
pub use shader_table::{ShaderRecord, ShaderTable};
pub use state_object::{
    HitGroupDesc, RaytracingPipeline, RaytracingPipelineDesc, ShaderIdentifier,
};
