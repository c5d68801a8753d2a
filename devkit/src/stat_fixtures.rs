/*!
Fixtures /proc/stat pour les tests

Construit des paires de lectures `cpuN ...` (avant / après l'intervalle)
avec des deltas connus, pour tester la classification sans machine réelle.
*/

use std::collections::BTreeMap;

/// Compteurs de base d'un CPU: user nice system idle iowait irq softirq steal guest guest_nice
pub const BASE_COUNTERS: [u64; 10] = [4705, 356, 584, 3_699_176, 23_060, 0, 14, 0, 0, 0];

const USER: usize = 0;
const IDLE: usize = 3;

/// Construit le texte d'une lecture /proc/stat (lignes cpuN uniquement)
#[derive(Debug, Clone, Default)]
pub struct ProcStatBuilder {
    lines: BTreeMap<u32, Vec<u64>>,
}

impl ProcStatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu(mut self, cpu: u32, counters: &[u64]) -> Self {
        self.lines.insert(cpu, counters.to_vec());
        self
    }

    pub fn build(&self) -> String {
        self.lines
            .iter()
            .map(|(cpu, counters)| {
                let values: Vec<String> = counters.iter().map(|v| v.to_string()).collect();
                format!("cpu{} {}\n", cpu, values.join(" "))
            })
            .collect()
    }
}

/// Paire de lectures avec un comportement choisi par CPU
#[derive(Debug, Clone, Default)]
pub struct SamplePair {
    first: ProcStatBuilder,
    second: ProcStatBuilder,
}

impl SamplePair {
    pub fn new() -> Self {
        Self::default()
    }

    /// CPU qui a passé `total_delta` ticks dont `idle_delta` au repos
    pub fn load(mut self, cpu: u32, total_delta: u64, idle_delta: u64) -> Self {
        let mut after = BASE_COUNTERS;
        after[USER] += total_delta.saturating_sub(idle_delta);
        after[IDLE] += idle_delta;
        self.first = self.first.cpu(cpu, &BASE_COUNTERS);
        self.second = self.second.cpu(cpu, &after);
        self
    }

    /// CPU totalement au repos pendant 1000 ticks
    pub fn idle(self, cpu: u32) -> Self {
        self.load(cpu, 1000, 1000)
    }

    /// CPU saturé pendant 1000 ticks
    pub fn busy(self, cpu: u32) -> Self {
        self.load(cpu, 1000, 0)
    }

    /// Compteurs identiques dans les deux lectures
    pub fn frozen(mut self, cpu: u32) -> Self {
        self.first = self.first.cpu(cpu, &BASE_COUNTERS);
        self.second = self.second.cpu(cpu, &BASE_COUNTERS);
        self
    }

    /// CPU présent dans la première lecture seulement (retiré à chaud)
    pub fn vanished(mut self, cpu: u32) -> Self {
        self.first = self.first.cpu(cpu, &BASE_COUNTERS);
        self
    }

    pub fn first(&self) -> String {
        self.first.build()
    }

    pub fn second(&self) -> String {
        self.second.build()
    }
}
