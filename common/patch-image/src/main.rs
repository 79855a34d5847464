/*++

Licensed under the Apache-2.0 license.

--*/
use clap::{Arg, Command};
/// CX2070x Patch Image Tool
///
/// This tool works with firmware patch images for the CX2070x audio codec.
/// It supports encoding a patch manifest (in TOML format) into a binary
/// patch image and decoding a patch image back into a manifest plus one
/// payload file per memory record.
///
/// This CLI tool provides the following subcommands:
/// - `encode`: Convert a manifest TOML file into a patch image.
/// - `decode`: Convert a patch image back into a manifest TOML file and its record payloads.
///
/// # Examples
///
/// Encode a manifest file:
/// ```bash
/// patch-image encode --manifest manifest.toml --file cx2070x.fw
/// ```
///
/// Decode a patch image:
/// ```bash
/// patch-image decode --package cx2070x.fw --directory output
/// ```
///
use patch_image::PatchManifest;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("CX2070x Patch Image Tool")
        .version("1.0")
        .about("Encodes/decodes CX2070x firmware patch images")
        .subcommand(
            Command::new("encode")
                .about("Encodes a manifest TOML file to a patch image")
                .arg(
                    Arg::new("manifest")
                        .short('m')
                        .long("manifest")
                        .value_name("MANIFEST")
                        .help("Path to the manifest TOML file")
                        .required(true),
                )
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .help("Output file for the patch image")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("decode")
                .about("Decodes a patch image to a manifest and record payloads")
                .arg(
                    Arg::new("package")
                        .short('p')
                        .long("package")
                        .value_name("PACKAGE")
                        .help("Path to the patch image file")
                        .required(true),
                )
                .arg(
                    Arg::new("dir")
                        .short('d')
                        .long("directory")
                        .value_name("DIRECTORY")
                        .help("Output directory for manifest and record payloads")
                        .required(true),
                ),
        )
        .get_matches();

    // Match on the subcommand and handle the arguments
    match matches.subcommand() {
        Some(("encode", sub_matches)) => {
            let manifest_path = sub_matches.get_one::<String>("manifest").unwrap();
            let output_path = sub_matches.get_one::<String>("file").unwrap();
            let manifest: PatchManifest = PatchManifest::parse_manifest_file(manifest_path)
                .expect("Failed to parse the manifest file");
            manifest.generate_patch_image(output_path)?;
            println!("Encoded patch image to binary file: {}", output_path);
        }
        Some(("decode", sub_matches)) => {
            let package_path = sub_matches.get_one::<String>("package").unwrap();
            let output_dir = sub_matches.get_one::<String>("dir").unwrap();
            PatchManifest::decode_patch_image(package_path, Some(output_dir))
                .expect("Failed to decode the patch image");
            println!("Decoded patch image to directory: {}", output_dir);
        }
        _ => {
            println!("Use either 'encode' or 'decode' subcommands.");
            std::process::exit(1);
        }
    }

    Ok(())
}
