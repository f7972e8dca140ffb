tonic::include_proto!("pb");
#[allow(dead_code)]
pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("fx_descriptor");

/// Marker returned by every lifecycle operation that has no payload.
pub const OK: &str = "OK";

impl Message {
    pub fn ok() -> Self {
        Self { msg: OK.to_string() }
    }
}

impl From<&FunctionResources> for Resources {
    fn from(value: &FunctionResources) -> Self {
        Self {
            memory: value.memory.clone(),
            cpu: value.cpu.clone(),
            gpu: value.gpu.clone(),
        }
    }
}

impl From<&FunctionTrigger> for Trigger {
    fn from(value: &FunctionTrigger) -> Self {
        Self {
            name: value.name.clone(),
            topic: value.topic.clone(),
            time: value.time.clone(),
        }
    }
}
