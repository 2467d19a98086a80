use candle_core::Device;
use tracing::info;

use codelens_core::traits::MemoryGauge;

pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) { info!("device: metal"); return dev; }
    }
    #[cfg(feature = "cuda")]
    {
        if let Ok(dev) = Device::new_cuda(0) { info!("device: cuda:0"); return dev; }
    }
    info!("device: cpu");
    Device::Cpu
}

/// Free host memory from `/proc/meminfo`. Used when models run on the CPU
/// or share unified memory with it; reports `None` elsewhere.
pub struct HostMemory;

impl MemoryGauge for HostMemory {
    fn free_memory_bytes(&self) -> Option<u64> {
        let text = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_mem_available(&text)
    }
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
