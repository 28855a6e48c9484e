//! Flexvolume driver entry point.

use clap::Args;
use vmlet_flexvolume::FlexVolumeDriver;

/// Run one flexvolume driver call (`init`, `mount`, `unmount`, ...).
#[derive(Args, Debug)]
pub struct FlexVolumeCmd {
    /// Operation and its arguments, as passed by the orchestrator.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl FlexVolumeCmd {
    /// Execute the driver call. The response always goes to stdout; the
    /// orchestrator reads failures from its `status` field.
    pub fn run(self) -> vmlet::Result<()> {
        let response = FlexVolumeDriver::default().dispatch(&self.args);
        tracing::debug!(args = ?self.args, status = ?response.status, "flexvolume call");
        println!("{}", response.to_json());
        Ok(())
    }
}
