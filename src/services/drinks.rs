// Drink categorisation and hydration lookup

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrinkCategory {
    Water,
    SparklingWater,
    Coffee,
    Tea,
    Milk,
    Juice,
    Smoothie,
    Soda,
    Alcohol,
    EnergyDrink,
    SportsDrink,
    Other,
}

impl DrinkCategory {
    /// Fraction of the volume that counts toward the daily goal
    pub fn hydration_factor(&self) -> f64 {
        match self {
            Self::Water | Self::SparklingWater => 1.0,
            Self::SportsDrink => 0.95,
            Self::Tea | Self::Milk => 0.9,
            Self::Juice => 0.85,
            Self::Coffee | Self::Smoothie | Self::Other => 0.8,
            Self::Soda => 0.7,
            Self::EnergyDrink => 0.6,
            Self::Alcohol => 0.0,
        }
    }

    /// Ounces credited toward hydration, rounded to one decimal
    pub fn hydration_oz(&self, volume_oz: f64) -> f64 {
        (volume_oz * self.hydration_factor() * 10.0).round() / 10.0
    }
}

type Rule = (fn(&str) -> bool, DrinkCategory);

fn any_of(name: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| name.contains(k))
}

// First match wins. The alcohol rule's "drink" keyword also catches
// "energy drink" and "sports drink" before their own rules run.
const RULES: &[Rule] = &[
    (
        |n| any_of(n, &["sparkling", "seltzer", "la croix", "perrier", "club soda"]),
        DrinkCategory::SparklingWater,
    ),
    (|n| n.contains("water") && !n.contains("coconut"), DrinkCategory::Water),
    (
        |n| any_of(n, &["coffee", "latte", "espresso", "cappuccino", "americano", "macchiato", "mocha", "cold brew"]),
        DrinkCategory::Coffee,
    ),
    (|n| any_of(n, &["tea", "matcha", "chai", "kombucha"]), DrinkCategory::Tea),
    (|n| any_of(n, &["smoothie", "shake"]), DrinkCategory::Smoothie),
    (|n| any_of(n, &["milk", "kefir"]), DrinkCategory::Milk),
    (|n| any_of(n, &["juice", "lemonade", "coconut"]), DrinkCategory::Juice),
    (
        |n| any_of(n, &["beer", "wine", "vodka", "whiskey", "tequila", "rum", "cocktail", "margarita", "cider", "drink"]),
        DrinkCategory::Alcohol,
    ),
    (|n| any_of(n, &["energy", "red bull", "monster", "celsius"]), DrinkCategory::EnergyDrink),
    (
        |n| any_of(n, &["gatorade", "powerade", "sports", "electrolyte", "bodyarmor"]),
        DrinkCategory::SportsDrink,
    ),
    (|n| any_of(n, &["soda", "cola", "sprite", "pepsi", "dr pepper", "fanta", "pop"]), DrinkCategory::Soda),
];

/// Categorise a drink by name using the ordered rule table
pub fn categorize(name: &str) -> DrinkCategory {
    let name = name.to_lowercase();
    RULES
        .iter()
        .find(|(matches, _)| matches(&name))
        .map(|(_, category)| *category)
        .unwrap_or(DrinkCategory::Other)
}
