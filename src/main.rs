use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use clap::Parser;
use clap_stdin::MaybeStdin;
use mdoc_transfer::cbor;
use mdoc_transfer::config::TransferInfo;
use mdoc_transfer::definitions::{IssuerSigned, ItemsRequest};
use mdoc_transfer::presentation::disclosure::{self, DisclosureRequest};
use mdoc_transfer::presentation::fragment;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Print the namespaces and element identifiers of a credential.
    Namespaces {
        /// Base64 encoded CBOR IssuerSigned, as stored in a transfer info file.
        issuer_signed: MaybeStdin<String>,
    },
    /// Print what a request would disclose from the credentials of a transfer info file.
    Disclose {
        /// Transfer info JSON file.
        info: PathBuf,
        /// JSON array of items requests.
        request: PathBuf,
    },
    /// Split a hex encoded message into the fragments sent over the transport.
    Fragments {
        /// Largest fragment, header included.
        #[arg(long, default_value_t = 512)]
        size: usize,
        message: MaybeStdin<String>,
    },
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().action {
        Action::Namespaces { issuer_signed } => print_namespaces(issuer_signed.trim()),
        Action::Disclose { info, request } => print_disclosure(&info, &request),
        Action::Fragments { size, message } => {
            for fragment in fragments(message.trim(), size)? {
                println!("{fragment}");
            }
            Ok(())
        }
    }
}

fn print_namespaces(issuer_signed: &str) -> Result<(), Error> {
    let bytes = base64::decode(issuer_signed).context("issuer signed data is not base64")?;
    let issuer_signed: IssuerSigned =
        cbor::from_slice(&bytes).context("could not parse issuer signed data")?;
    let mut claims: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (namespace, element) in issuer_signed.element_identifiers() {
        claims.entry(namespace).or_default().push(element);
    }
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}

fn print_disclosure(info: &Path, request: &Path) -> Result<(), Error> {
    let info = TransferInfo::from_path(info).context("could not load transfer info")?;
    let request = std::fs::read_to_string(request).context("could not read request")?;
    let requests: Vec<ItemsRequest> =
        serde_json::from_str(&request).context("could not parse request")?;
    let disclosure = disclosure::filter(
        &info.credentials,
        DisclosureRequest::Verifier {
            requests: &requests,
            selection: None,
        },
    );
    let summary = json!({
        "validItems": disclosure.valid_items,
        "errorItems": disclosure.error_items,
        "documentErrors": disclosure.document_errors,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn fragments(message: &str, size: usize) -> Result<Vec<String>, Error> {
    let message = hex::decode(message).context("message is not hex")?;
    let block_size = size
        .checked_sub(1)
        .and_then(NonZeroUsize::new)
        .context("fragment size must be at least 2")?;
    Ok(fragment::frame(&message, block_size)
        .into_iter()
        .map(hex::encode)
        .collect())
}
