use clap::Parser;
use color_eyre::Result;
use log::info;

use radar_acquisition::{build_controller, AcquisitionParams};

// Each slice sample becomes a PREVIEW_SCALE x PREVIEW_SCALE block in the PNG.
const PREVIEW_SCALE: u32 = 8;

fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let params = AcquisitionParams::parse();
    params.pretty_print();

    let mut controller = build_controller(&params)?;
    controller.connect_and_configure()?;

    let result = (0..params.captures).try_for_each(|n| -> Result<()> {
        controller.trigger_capture()?;
        let counter = params.counter + u64::from(n);
        let path = params
            .output_dir
            .join(format!("{}_{}_im_2d.png", params.prefix, counter));
        let preview = controller.refresh_preview()?;
        preview.save_png(&path, PREVIEW_SCALE)?;
        info!(
            "Rendered {}x{} slice to {}",
            preview.width,
            preview.height,
            path.display()
        );
        Ok(())
    });

    controller.shutdown();
    result
}
