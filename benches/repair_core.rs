use api_mender::config::Config;
use api_mender::orchestrator::{FixType, Orchestrator};
use api_mender::repair::quotes::analyze_line;
use api_mender::repair::StringLiteralRepairer;
use api_mender::syntax;
use api_mender::workspace::FileLocks;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn synthetic_module(routes: usize) -> String {
    let mut source = String::from(
        "\"\"\"Synthetic listings API.\"\"\"\nfrom fastapi import APIRouter, HTTPException\nfrom pydantic import BaseModel\n\nrouter = APIRouter()\n\n\nclass Item(BaseModel):\n    name: str\n    description: str = \"\"\n",
    );
    for i in 0..routes {
        source.push_str(&format!(
            "\n\n@router.get(\"/items/{i}\", operation_id=\"get_item_{i}\")\ndef get_item_{i}(item_id: int):\n    if item_id < 0:\n        raise HTTPException(status_code=404, detail='Item {i} not found')\n    return {{\"id\": item_id, \"label\": \"item #{i}\"}}\n"
        ));
    }
    source
}

fn bench_validate(c: &mut Criterion) {
    let clean = synthetic_module(200);
    c.bench_function("validate_clean_module", |b| {
        b.iter(|| black_box(syntax::validate(black_box(&clean)).is_valid));
    });

    let broken = clean.replacen("detail='Item 100 not found'", "detail='Item 100 not found", 1);
    c.bench_function("validate_unterminated_module", |b| {
        b.iter(|| black_box(syntax::validate(black_box(&broken)).error_line()));
    });
}

fn bench_quote_analysis(c: &mut Criterion) {
    let lines: Vec<String> = synthetic_module(200).lines().map(str::to_string).collect();
    c.bench_function("analyze_line_module", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(analyze_line(black_box(line)));
            }
        });
    });
}

fn bench_string_repair(c: &mut Criterion) {
    let broken = synthetic_module(50).replacen("detail='Item 25 not found'", "detail='Item 25 not found", 1);
    let line = syntax::validate(&broken).error_line().unwrap_or(1);
    let repairer = StringLiteralRepairer::default();
    c.bench_function("repair_single_unterminated", |b| {
        b.iter(|| black_box(repairer.repair(black_box(&broken), line).applied));
    });
}

fn bench_fix_all(c: &mut Criterion) {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("apis");
    for i in 0..40 {
        let dir = root.join(format!("module_{i:02}"));
        std::fs::create_dir_all(&dir).expect("create module dir");
        std::fs::write(dir.join("__init__.py"), synthetic_module(10)).expect("write module");
    }
    let orchestrator = Orchestrator::with_locks(
        Config::for_root(&root),
        FileLocks::new(temp.path().join("locks")),
    );

    c.bench_function("fix_all_clean_tree", |b| {
        b.iter(|| {
            let report = orchestrator.fix_all(FixType::All).expect("fix_all");
            black_box(report.tally.modules_without_issues);
        });
    });
}

criterion_group!(
    repair_core,
    bench_validate,
    bench_quote_analysis,
    bench_string_repair,
    bench_fix_all
);
criterion_main!(repair_core);
