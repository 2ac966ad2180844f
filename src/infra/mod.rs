// Infrastructure layer - 基础设施层
// 监控指标

pub mod metrics;
