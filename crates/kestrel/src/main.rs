//
// main.rs
//
// Command line entry point
//

use std::env;

use kestrel::{backend, cli};

fn print_usage() {
    println!(
        "kestrel {}, a keyword namespace and resolution server.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: kestrel [OPTIONS]
       kestrel check <path> [CHECK OPTIONS]

Available options:

--stdio                      Start the LSP server using stdio transport
--version                    Print the version
--help                       Print this help message

Check options:

--library-path <dir>         Directory with libdoc JSON specs (repeatable)
--resource-path <dir>        Directory searched for resource files (repeatable)
--search-order <name>        Library that wins ambiguous keyword lookups (repeatable)
--no-unused                  Skip the unused keyword scan

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut use_stdio = false;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--stdio" => use_stdio = true,
            "check" => {
                env_logger::init();
                let code = cli::check::main(&mut argv).await?;
                std::process::exit(code);
            }
            "--version" => {
                println!("kestrel {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    if !use_stdio {
        print_usage();
        return Ok(());
    }

    env_logger::init();

    backend::start_lsp().await
}
