//! onepassword-operator - keeps Kubernetes Secrets in sync with vault items

use std::sync::Arc;

use clap::Parser;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, Resource};
use tokio_util::sync::CancellationToken;

use onepassword_operator::config::{ConnectSettings, OperatorConfig};
use onepassword_operator::connect::ensure_connect;
use onepassword_operator::controller::{
    deployment, error_policy, item, read_timeout, watcher_config, Context,
};
use onepassword_operator::crd::{crd_yaml, OnePasswordItem};
use onepassword_operator::scanner::DriftScanner;
use onepassword_operator::telemetry::{init_telemetry, LogFormat};
use onepassword_operator::FIELD_MANAGER;

/// Syncs 1Password items into Kubernetes Secrets and restarts the workloads using them
#[derive(Parser, Debug)]
#[command(name = "onepassword-operator", version, about, long_about = None)]
struct Cli {
    /// Print the OnePasswordItem CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    operator: OperatorConfig,

    #[command(flatten)]
    connect: ConnectSettings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_telemetry(LogFormat::from_env())?;
    run_operator(cli.operator, cli.connect).await
}

/// Install the OnePasswordItem CRD
///
/// Applied on every start so the stored schema always matches this binary.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let name = format!(
        "{}.{}",
        OnePasswordItem::plural(&()),
        OnePasswordItem::group(&())
    );
    tracing::info!(crd = %name, "installing CRD");
    crds.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&OnePasswordItem::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to install OnePasswordItem CRD: {e}"))?;
    Ok(())
}

async fn kube_client(config: &OperatorConfig) -> anyhow::Result<Client> {
    let mut kube_config = kube::Config::infer()
        .await
        .map_err(|e| anyhow::anyhow!("failed to load kubeconfig: {e}"))?;
    kube_config.connect_timeout = Some(config.request_timeout());
    kube_config.read_timeout = Some(read_timeout(config.request_timeout()));
    Client::try_from(kube_config).map_err(|e| anyhow::anyhow!("failed to create client: {e}"))
}

/// Run both controllers in every watched scope, plus the drift scanner
async fn run_operator(config: OperatorConfig, connect: ConnectSettings) -> anyhow::Result<()> {
    let vault = Arc::new(connect.client(config.request_timeout())?);
    let client = kube_client(&config).await?;

    ensure_crd_installed(&client).await?;

    if config.manage_connect {
        ensure_connect(&client, &config.operator_namespace).await?;
    }

    tracing::info!(
        namespaces = ?config.namespaces(),
        polling_interval = config.polling_interval,
        auto_restart = config.auto_restart,
        "starting onepassword operator"
    );

    let ctx = Arc::new(Context::new(client.clone(), vault, config.clone()));

    let cancel = CancellationToken::new();
    let scanner_task = config.polling_interval().map(|period| {
        let scanner = DriftScanner::new(ctx.store.clone(), ctx.vault.clone(), config.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move { scanner.run(period, cancel).await })
    });

    let mut controllers: Vec<BoxFuture<'static, ()>> = Vec::new();
    for scope in config.scopes() {
        controllers.push(item_controller(&client, scope.as_deref(), ctx.clone()));
        controllers.push(deployment_controller(&client, scope.as_deref(), ctx.clone()));
    }
    future::join_all(controllers).await;

    tracing::info!("controllers stopped, shutting down");
    cancel.cancel();
    if let Some(task) = scanner_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "drift scanner task failed");
        }
    }
    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn item_controller(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<Context>,
) -> BoxFuture<'static, ()> {
    let items: Api<OnePasswordItem> = scoped_api(client, namespace);
    let secrets: Api<Secret> = scoped_api(client, namespace);
    tracing::info!(scope = ?namespace, "starting OnePasswordItem controller");

    Controller::new(items, watcher_config())
        .owns(secrets, watcher_config())
        .shutdown_on_signal()
        .run(item::reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "OnePasswordItem reconciled"),
                Err(e) => tracing::error!(error = ?e, "OnePasswordItem reconcile error"),
            }
        })
        .boxed()
}

fn deployment_controller(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<Context>,
) -> BoxFuture<'static, ()> {
    let deployments: Api<Deployment> = scoped_api(client, namespace);
    tracing::info!(scope = ?namespace, "starting Deployment controller");

    Controller::new(deployments, watcher_config())
        .shutdown_on_signal()
        .run(deployment::reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Deployment reconciled"),
                Err(e) => tracing::error!(error = ?e, "Deployment reconcile error"),
            }
        })
        .boxed()
}
