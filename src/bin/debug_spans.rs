//! Debug tool: dump every text span with its font metrics and the section cutoff

use pdf_sections::{extract_spans, section_font_cutoff};
use std::env;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <pdf_file> [--json]", args[0]);
        process::exit(1);
    }
    let json = args.iter().skip(2).any(|a| a == "--json");

    let spans = match extract_spans(&args[1]) {
        Ok(spans) => spans,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&spans) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    for span in &spans {
        println!(
            "p{:<3} y={:7.1} size={:5.1} {} \"{}\"",
            span.page,
            span.y,
            span.font_size,
            if span.bold { "B" } else { " " },
            span.text.chars().take(60).collect::<String>()
        );
    }

    println!("\n{} spans", spans.len());
    match section_font_cutoff(&spans) {
        Ok(cutoff) => println!("Section cutoff: {:.1}", cutoff),
        Err(e) => println!("Section cutoff: none ({})", e),
    }
}
