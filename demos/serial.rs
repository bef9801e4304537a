use std::env;
use std::time::Duration;

use bench_psu_rtu::{
    frame::{append_crc, decode_response, format_hex, parse_hex},
    serial::available_ports,
    DeviceController, SerialConfig, SerialConnector, StatusPoller, StatusSample,
};
use fugit::MillisDurationU32;
use inquire::Select;

// Configuration constants - adjust these for your setup
const OUTPUT_VOLTAGE_V: f64 = 5.0;
const CURRENT_LIMIT_A: f64 = 0.1;
const STABILIZATION_DELAY_MS: u64 = 1000;
const SAMPLE_COUNT: usize = 5;

fn main() {
    env_logger::init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let port_names = available_ports().expect("Failed to enumerate serial ports");

        if port_names.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    println!("Using port: {}", port_name);

    let psu = DeviceController::new(SerialConnector, SerialConfig::default());
    psu.connect(&port_name).expect("Failed to open serial port");

    // Dump the interesting part of the register map
    println!("\n--- Registers ---");
    for (address, value) in psu.dump_registers(0x0001, 2).unwrap() {
        println!("0x{:04X} = 0x{:04X} ({})", address, value, value);
    }

    psu.set_voltage(OUTPUT_VOLTAGE_V).unwrap();
    println!("Set output voltage to {}V", OUTPUT_VOLTAGE_V);

    psu.set_current(CURRENT_LIMIT_A).unwrap();
    println!("Set current limit to {}A", CURRENT_LIMIT_A);

    psu.set_output(true).unwrap();
    println!("Output enabled");

    // Wait for output to stabilize
    std::thread::sleep(Duration::from_millis(STABILIZATION_DELAY_MS));

    println!("\n--- Status ---");
    let mut poller = StatusPoller::new(MillisDurationU32::millis(500));
    let mut samples: Vec<StatusSample> = Vec::new();
    for _ in 0..SAMPLE_COUNT {
        match poller.poll_once(&psu, &mut samples) {
            Ok(sample) => println!(
                "#{} {:.2}V {:.3}A {:.3}W protection={}",
                sample.sequence,
                sample.status.voltage,
                sample.status.current,
                sample.status.power,
                sample.status.protection_status
            ),
            Err(err) => println!("Poll failed: {}", err),
        }
        std::thread::sleep(Duration::from_millis(poller.interval().to_millis() as u64));
    }

    // Raw frame with a CRC placeholder, completed before sending
    println!("\n--- Raw frame ---");
    let mut request = parse_hex("01 03 00 10 00 01 XX XX").unwrap();
    append_crc(&mut request).unwrap();
    println!("TX {}", format_hex(&request));
    match psu.send_raw_frame(&request) {
        Ok(reply) => {
            println!("RX {}", format_hex(&reply));
            if let Ok(parsed) = decode_response(&reply) {
                println!("{}", parsed);
            }
        }
        Err(err) => println!("Raw frame failed: {}", err),
    }

    psu.set_output(false).unwrap();
    println!("\nOutput disabled");
    psu.disconnect().unwrap();
}
