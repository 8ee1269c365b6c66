//! サンプルマスタ

use super::{MasterStore, NewMasterItem};
use crate::error::Result;
use boq_cost_common::Decimal;

/// (コード, 品名, 材料費, 労務費)
const SAMPLE_ITEMS: &[(&str, &str, i64, i64)] = &[
    // 内装
    ("INT001", "Painting - Interior Wall", 150, 100),
    ("INT002", "Tile Installation - Floor", 300, 200),
    ("INT003", "Ceiling Installation - Gypsum", 250, 150),
    ("INT004", "Door Installation - Wooden", 800, 400),
    ("INT005", "Window Installation - Aluminum", 600, 300),
    ("INT006", "Flooring - Laminate", 400, 100),
    ("INT007", "Cabinet Installation - Kitchen", 1200, 800),
    ("INT008", "Partition - Drywall", 200, 120),
    ("INT009", "Molding - Decorative", 80, 40),
    ("INT010", "Lighting Fixture - Ceiling", 350, 150),
    // 電気
    ("EE001", "Cable Installation - 2.5mm²", 50, 30),
    ("EE002", "Conduit Installation - PVC 20mm", 25, 15),
    ("EE003", "Switch Installation - 1 Gang", 150, 100),
    ("EE004", "Outlet Installation - 13A", 120, 80),
    ("EE005", "Junction Box - 4x4", 80, 40),
    ("EE006", "Panelboard - 12 Way", 2500, 800),
    ("EE007", "Circuit Breaker - 32A", 300, 50),
    ("EE008", "Lighting Fixture - LED 18W", 400, 150),
    ("EE009", "Cable Tray - 300mm", 180, 120),
    ("EE010", "Grounding Rod - 2.4m", 200, 100),
    // 空調
    ("AC001", "Split Unit - 18,000 BTU", 15000, 3000),
    ("AC002", "Ducting - Flexible 6 inch", 120, 80),
    ("AC003", "Diffuser - 4 Way 600x600", 800, 200),
    ("AC004", "Thermostat - Digital", 1200, 300),
    ("AC005", "Refrigerant Piping - 1/2 inch", 200, 100),
    ("AC006", "Insulation - Pipe Wrap", 50, 30),
    ("AC007", "Condensate Drain - PVC", 80, 40),
    ("AC008", "Air Filter - Washable", 300, 50),
    ("AC009", "Remote Control - AC Unit", 500, 0),
    ("AC010", "Installation Kit - Wall Mount", 800, 400),
    // 消防
    ("FP001", "Smoke Detector - Photoelectric", 800, 200),
    ("FP002", "Fire Extinguisher - 10lb ABC", 1200, 100),
    ("FP003", "Fire Alarm Panel - 8 Zone", 5000, 1000),
    ("FP004", "Sprinkler Head - Standard", 300, 150),
    ("FP005", "Fire Hose - 50ft", 1500, 200),
    ("FP006", "Fire Cabinet - Steel", 2000, 400),
    ("FP007", "Fire Pump - 500 GPM", 15000, 3000),
    ("FP008", "Heat Detector - Fixed Temp", 600, 150),
    ("FP009", "Manual Pull Station", 400, 100),
    ("FP010", "Fire Pipe - 4 inch", 200, 100),
];

pub fn sample_items() -> Vec<NewMasterItem> {
    SAMPLE_ITEMS
        .iter()
        .map(|(code, name, material, labor)| {
            NewMasterItem::new(*name, Decimal::from(*material), Decimal::from(*labor)).with_code(*code)
        })
        .collect()
}

/// マスタが空のときだけサンプルを投入し、投入件数を返す
pub fn seed_if_empty(store: &dyn MasterStore) -> Result<usize> {
    if store.count()? > 0 {
        return Ok(0);
    }
    let count = store.upsert_many(&sample_items())?;
    tracing::info!(count, "seeded sample master items");
    Ok(count)
}
