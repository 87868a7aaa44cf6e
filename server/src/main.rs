/*
 * Copyright (c) 2021 gematik GmbH
 * 
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 * 
 *    http://www.apache.org/licenses/LICENSE-2.0
 * 
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use log::info;
use resources::primitives::Id;
use structopt::StructOpt;
use tokio::runtime::Builder;
use url::Url;

use sign_flow_server::{
    config::Config,
    error::Error,
    external::{
        CertificateSigning, CmsSigning, FsBlobStore, LogGateway, PdfComposer,
        Unconfigured,
    },
    logging::init_logger,
    service::{Service, TemplateFilter},
    state::{Inner, State},
};

fn main() -> Result<(), Error> {
    let opts = Options::from_args();

    init_logger(&opts.log_config)?;

    let state = load_state(&opts.state)?;
    let service = Service::new(
        state.clone(),
        create_config(&opts)?,
        Arc::new(FsBlobStore::new(&opts.blob_root)),
        create_signing(&opts)?,
        Arc::new(PdfComposer::default()),
        Arc::new(LogGateway),
    );

    let runtime = Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async move {
        run(&service, opts.command).await?;

        let inner = state.lock().await;
        let file = File::create(&opts.state)?;
        inner.save(BufWriter::new(file))?;

        info!("State saved to {}", opts.state.display());

        Ok(())
    })
}

async fn run(service: &Service, command: Command) -> Result<(), Error> {
    match command {
        Command::Resend {
            tenant,
            document,
            group,
        } => {
            let count = match (document, group) {
                (_, Some(group)) => service.resend_group(&tenant, &group).await?,
                (Some(document), None) => service.resend_pending(&tenant, &document).await?,
                (None, None) => {
                    return Err("Either --document or --group is required".to_owned().into())
                }
            };

            println!("{} signature request(s) sent again", count);
        }
        Command::Finalize { tenant, document } => {
            let ret = service.finalize(&tenant, &document).await?;

            println!("{:?}", ret);
        }
        Command::Show { tenant, document } => {
            let status = service.workflow_status(&tenant, &document).await?;

            println!(
                "Workflow {} ({:?})",
                status.instance.id, status.instance.status
            );
            for step in &status.steps {
                println!(
                    "  step {} phase {} party {} {}",
                    step.step_index,
                    step.phase_index,
                    step.party_id,
                    if step.is_completed() { "done" } else { "open" }
                );
            }
            for request in &status.requests {
                println!(
                    "  request {} document {} {:?}",
                    request.id, request.document_id, request.status
                );
            }
        }
        Command::Templates { tenant, area } => {
            let filter = TemplateFilter {
                area_id: area,
                is_active: None,
            };

            for template in service.template_list(&tenant, &filter).await {
                println!(
                    "{} {} ({} steps{})",
                    template.id,
                    template.name,
                    template.steps.len(),
                    if template.is_active { "" } else { ", inactive" }
                );
            }
        }
    }

    Ok(())
}

fn load_state(path: &Path) -> Result<State, Error> {
    let mut inner = Inner::default();

    if path.exists() {
        let file = File::open(path)?;
        inner.load(BufReader::new(file))?;

        info!("State loaded from {}", path.display());
    }

    Ok(State::from_inner(inner))
}

fn create_config(opts: &Options) -> Result<Config, Error> {
    Ok(Config {
        token_ttl: Duration::hours(opts.token_ttl_hours),
        token_grace: Duration::days(opts.token_grace_days),
        public_base_url: Url::parse(&opts.base_url)?,
        ..Default::default()
    })
}

fn create_signing(opts: &Options) -> Result<Arc<dyn CertificateSigning>, Error> {
    match (&opts.signer_key, &opts.signer_cert) {
        (Some(key), Some(cert)) => Ok(Arc::new(CmsSigning::from_pem_files(key, cert)?)),
        (None, None) => Ok(Arc::new(Unconfigured)),
        _ => Err("--signer-key and --signer-cert must be given together"
            .to_owned()
            .into()),
    }
}

fn parse_id(value: &str) -> Result<Id, String> {
    Id::try_from(value).map_err(|value| format!("Invalid Id: {}", value))
}

#[derive(Clone, StructOpt)]
struct Options {
    #[structopt(short = "c", long = "config", default_value = "./log4rs.yml")]
    log_config: PathBuf,

    #[structopt(short = "s", long = "state", default_value = "./state.json")]
    state: PathBuf,

    #[structopt(short = "b", long = "blob-root", default_value = "./blobs")]
    blob_root: PathBuf,

    #[structopt(short = "u", long = "base-url", default_value = "http://localhost:3000/")]
    base_url: String,

    #[structopt(short = "k", long = "signer-key")]
    signer_key: Option<PathBuf>,

    #[structopt(short = "t", long = "signer-cert")]
    signer_cert: Option<PathBuf>,

    #[structopt(long = "token-ttl-hours", default_value = "24")]
    token_ttl_hours: i64,

    #[structopt(long = "token-grace-days", default_value = "30")]
    token_grace_days: i64,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Clone, StructOpt)]
enum Command {
    /// Sends the open signature requests of the current step again.
    Resend {
        #[structopt(long = "tenant", parse(try_from_str = parse_id))]
        tenant: Id,

        #[structopt(long = "document", parse(try_from_str = parse_id))]
        document: Option<Id>,

        #[structopt(long = "group", parse(try_from_str = parse_id))]
        group: Option<Id>,
    },

    /// Creates the final version of a completed document.
    Finalize {
        #[structopt(long = "tenant", parse(try_from_str = parse_id))]
        tenant: Id,

        #[structopt(long = "document", parse(try_from_str = parse_id))]
        document: Id,
    },

    /// Prints the workflow of a document.
    Show {
        #[structopt(long = "tenant", parse(try_from_str = parse_id))]
        tenant: Id,

        #[structopt(long = "document", parse(try_from_str = parse_id))]
        document: Id,
    },

    /// Lists the workflow templates of a tenant.
    Templates {
        #[structopt(long = "tenant", parse(try_from_str = parse_id))]
        tenant: Id,

        #[structopt(long = "area", parse(try_from_str = parse_id))]
        area: Option<Id>,
    },
}
