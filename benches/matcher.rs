//! Benchmarks for the domain rule match engine.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use domainwall::blocklist::{CompiledRule, RuleSet, Snapshot, TenantData};
use domainwall::store::{DomainRule, IpWhitelistEntry, Tenant};

fn generate_rules(size: usize) -> Vec<DomainRule> {
    (0..size)
        .map(|i| {
            if i % 10 == 9 {
                DomainRule::regex(i.to_string(), format!(r"^track{i}\d*\."))
            } else {
                DomainRule::exact(i.to_string(), format!("blocked{i}.com"))
            }
        })
        .collect()
}

fn build_rule_set(rules: &[DomainRule]) -> RuleSet {
    let mut set = RuleSet::new();
    for rule in rules {
        if let Ok(compiled) = CompiledRule::compile(rule) {
            set.push(compiled);
        }
    }
    set
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_set_find");

    for size in &[10, 100, 1000, 10000] {
        let set = build_rule_set(&generate_rules(*size));

        group.bench_with_input(BenchmarkId::new("exact_hit", size), &set, |b, set| {
            b.iter(|| set.find(black_box("blocked0.com")));
        });

        group.bench_with_input(BenchmarkId::new("subdomain_hit", size), &set, |b, set| {
            b.iter(|| set.find(black_box("cdn.static.blocked0.com")));
        });

        group.bench_with_input(BenchmarkId::new("regex_hit", size), &set, |b, set| {
            b.iter(|| set.find(black_box("track9.example.com")));
        });

        // Worst case: every regex is tried.
        group.bench_with_input(BenchmarkId::new("miss", size), &set, |b, set| {
            b.iter(|| set.find(black_box("www.example.org")));
        });
    }

    group.finish();
}

fn bench_snapshot_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_build");

    for tenants in &[1, 10, 100] {
        let data: Vec<TenantData> = (0..*tenants)
            .map(|t| TenantData {
                tenant: Tenant {
                    id: format!("tenant-{t}"),
                    active: true,
                },
                rules: generate_rules(100),
                whitelist: vec![IpWhitelistEntry::new(
                    format!("ip-{t}"),
                    format!("10.0.{}.{}", t / 256, t % 256),
                )],
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("build", tenants), &data, |b, data| {
            b.iter(|| Snapshot::build(1, black_box(data.clone())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_find, bench_snapshot_build);
criterion_main!(benches);
