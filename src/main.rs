use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::{info, warn};

use mediaflow::{purge_uploads, update_project_totals, ApplicationContext};
use mediaflow_core::{init_logging, AppConfig};
use mediaflow_dispatcher::IngestRequest;
use mediaflow_domain::{JobType, LabelSelector};
use mediaflow_infrastructure::{connect, PostgresProjectRepository};
use mediaflow_search::RebuildSection;

fn cli() -> Command {
    Command::new("mediaflow")
        .version("0.1.0")
        .about("媒体导入工作流编排与搜索索引运维工具")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认路径查找")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(
            Command::new("rebuild-index")
                .about("重建项目的搜索索引")
                .arg(
                    Arg::new("project")
                        .long("project")
                        .value_name("ID")
                        .required(true)
                        .value_parser(value_parser!(i64)),
                )
                .arg(
                    Arg::new("section")
                        .long("section")
                        .value_name("SECTION")
                        .required(true)
                        .value_parser(RebuildSection::ALL.map(|s| s.as_str())),
                ),
        )
        .subcommand(
            Command::new("purge-uploads")
                .about("删除过期且未被引用的上传文件")
                .arg(
                    Arg::new("max-age-days")
                        .long("max-age-days")
                        .value_name("DAYS")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("update-project-totals")
                .about("重新统计项目文件数与存储大小")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("无论是否变化都写回")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("cancel")
                .about("请求停止匹配的工作流")
                .arg(
                    Arg::new("selector")
                        .long("selector")
                        .value_name("SELECTOR")
                        .help("标签选择器，例如 project=1,gid=abc")
                        .required(true),
                )
                .arg(
                    Arg::new("job-type")
                        .long("job-type")
                        .value_name("TYPE")
                        .value_parser(["upload", "algorithm"])
                        .default_value("upload"),
                ),
        )
        .subcommand(
            Command::new("submit")
                .about("提交一次导入请求")
                .arg(
                    Arg::new("request")
                        .long("request")
                        .value_name("FILE")
                        .help("JSON 格式的导入请求")
                        .required(true),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>")))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    match matches.subcommand() {
        Some(("rebuild-index", args)) => rebuild_index(config, args).await,
        Some(("purge-uploads", args)) => {
            let max_age_days = args
                .get_one::<u64>("max-age-days")
                .copied()
                .unwrap_or(config.uploads.max_age_days);
            let pool = connect(&config.database).await.context("连接数据库失败")?;
            let projects = PostgresProjectRepository::new(pool);
            let reports = purge_uploads(&projects, &config.uploads.roots(), max_age_days).await?;
            let removed: usize = reports.iter().map(|r| r.removed).sum();
            info!("清理完成，共删除 {} 个文件", removed);
            Ok(())
        }
        Some(("update-project-totals", args)) => {
            let pool = connect(&config.database).await.context("连接数据库失败")?;
            let projects = PostgresProjectRepository::new(pool);
            let updated = update_project_totals(&projects, args.get_flag("force")).await?;
            info!("已更新 {} 个项目的存储统计", updated);
            Ok(())
        }
        Some(("cancel", args)) => cancel(config, args).await,
        Some(("submit", args)) => submit(config, args).await,
        Some((other, _)) => Err(anyhow::anyhow!("不支持的命令: {other}")),
        None => Err(anyhow::anyhow!("缺少子命令")),
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("缺少参数 --{name}"))
}

async fn rebuild_index(config: AppConfig, args: &ArgMatches) -> Result<()> {
    let project = *args
        .get_one::<i64>("project")
        .context("缺少参数 --project")?;
    let section: RebuildSection = required(args, "section")?.parse()?;

    let context = ApplicationContext::connect(config).await?;
    let summary = context.rebuilder().rebuild(project, section).await?;
    if !summary.report.is_complete() {
        for failure in &summary.report.failures {
            warn!("文档 {} 索引失败: {}", failure.id, failure.reason);
        }
    }
    Ok(())
}

async fn cancel(config: AppConfig, args: &ArgMatches) -> Result<()> {
    let selector = LabelSelector::parse(required(args, "selector")?)?;
    let job_type: JobType = required(args, "job-type")?.parse()?;

    let context = ApplicationContext::connect(config).await?;
    if context.jobs().cancel(&selector, job_type).await? {
        info!("已请求停止匹配 {} 的 {} 工作流", selector, job_type);
    } else {
        warn!("没有可停止的 {} 工作流匹配 {}", job_type, selector);
    }
    Ok(())
}

async fn submit(config: AppConfig, args: &ArgMatches) -> Result<()> {
    let path = required(args, "request")?;
    let body = std::fs::read_to_string(path).with_context(|| format!("读取请求文件失败: {path}"))?;
    let request: IngestRequest =
        serde_json::from_str(&body).with_context(|| format!("解析导入请求失败: {path}"))?;

    let context = ApplicationContext::connect(config).await?;
    let handle = context.ingest().submit(&request).await?;
    info!("已提交工作流 {} (命名空间 {})", handle.name, handle.namespace);
    Ok(())
}
