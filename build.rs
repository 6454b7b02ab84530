use cfg_aliases::cfg_aliases;

fn main() {
    cfg_aliases! {
        // Bulk save/restore of variable values.
        snapshot: { feature = "serde" },
        // Compact formatting of the plain-data types.
        fmt: { feature = "defmt" },
    }
}
