//! Connect to a detector and run a short software-triggered acquisition.

use pilproto::camserver::{Detector, TriggerMode};
use simple_logger::SimpleLogger;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init().unwrap();

    // Connect to the detector and configure a short series.
    let mut detector = Detector::connect("10.0.0.5")?;
    detector.set_image_count(10)?;
    detector.set_exposure_time(0.1)?;
    detector.set_exposure_period(0.11)?;

    // Start a software-triggered acquisition and poll until the detector
    // reports its completion.
    detector.start(TriggerMode::Software, "scan_0001.cbf")?;
    while detector.is_acquiring()? {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    println!("acquisition complete: {}", detector.image_path()?);
    Ok(())
}
