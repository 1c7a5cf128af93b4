//! Event-script command and symbol tables.
//!
//! A built-in Gen3 command table is always present; YAML or JSON symbol
//! files are overlaid on top of it:
//!
//! ```yaml
//! commands:
//!   0x29: { name: setflag, args: f, desc: "Sets a flag" }
//! flags:
//!   0x0820: FLAG_BADGE01_GET
//! specials:
//!   0x0000: HealPlayerParty
//! ```

use crate::version_db::parse_number;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {table} key '{key}'")]
    InvalidKey { table: &'static str, key: String },

    #[error("command {opcode:#04x} ({name}) has unknown argument kind '{kind}'")]
    InvalidArgFormat { opcode: u8, name: String, kind: char },
}

/// Argument encodings used in command format strings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Byte,
    Word,
    Dword,
    Var,
    Flag,
    Item,
    Species,
    Move,
    Pointer,
}

impl ArgKind {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'b' => Self::Byte,
            'w' => Self::Word,
            'd' => Self::Dword,
            'v' => Self::Var,
            'f' => Self::Flag,
            'i' => Self::Item,
            'p' => Self::Species,
            'M' => Self::Move,
            'P' => Self::Pointer,
            _ => return None,
        })
    }

    pub fn tag(self) -> char {
        match self {
            Self::Byte => 'b',
            Self::Word => 'w',
            Self::Dword => 'd',
            Self::Var => 'v',
            Self::Flag => 'f',
            Self::Item => 'i',
            Self::Species => 'p',
            Self::Move => 'M',
            Self::Pointer => 'P',
        }
    }

    /// Encoded size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Dword | Self::Pointer => 4,
            _ => 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandDef {
    pub name: String,
    pub args: String,
    pub desc: String,
}

impl CommandDef {
    /// Argument kinds; unknown format characters are skipped.
    pub fn arg_kinds(&self) -> Vec<ArgKind> {
        self.args.chars().filter_map(ArgKind::from_char).collect()
    }
}

#[rustfmt::skip]
const BUILTIN_COMMANDS: &[(u8, &str, &str, &str)] = &[
    (0x00, "nop", "", "Does nothing"),
    (0x01, "nop1", "", "Does nothing"),
    (0x02, "end", "", "Terminates script execution"),
    (0x03, "return", "", "Returns from a call"),
    (0x04, "call", "P", "Calls a subscript"),
    (0x05, "goto", "P", "Jumps to a script"),
    (0x06, "goto_if", "bP", "Jumps if the last comparison matches"),
    (0x07, "call_if", "bP", "Calls if the last comparison matches"),
    (0x08, "gotostd", "b", "Jumps to a standard script"),
    (0x09, "callstd", "b", "Calls a standard script"),
    (0x0A, "gotostd_if", "bb", "Jumps to a standard script conditionally"),
    (0x0B, "callstd_if", "bb", "Calls a standard script conditionally"),
    (0x0C, "returnram", "", "Runs the script stored in save RAM"),
    (0x0D, "endram", "", "Ends the RAM script"),
    (0x0E, "setmysteryeventstatus", "b", "Sets the mystery event status"),
    (0x0F, "loadword", "bd", "Loads a dword into a script bank"),
    (0x10, "loadbyte", "bb", "Loads a byte into a script bank"),
    (0x11, "setptr", "bd", "Writes a byte to an address"),
    (0x12, "loadbytefromptr", "bd", "Loads a byte from an address"),
    (0x13, "setptrbyte", "bd", "Stores a bank byte at an address"),
    (0x14, "copylocal", "bb", "Copies one bank to another"),
    (0x15, "copybyte", "dd", "Copies a byte between addresses"),
    (0x16, "setvar", "vw", "Sets a variable"),
    (0x17, "addvar", "vw", "Adds to a variable"),
    (0x18, "subvar", "vw", "Subtracts from a variable"),
    (0x19, "copyvar", "vv", "Copies a variable"),
    (0x1A, "setorcopyvar", "vw", "Sets or copies a variable"),
    (0x1B, "compare_local_to_local", "bb", "Compares two banks"),
    (0x1C, "compare_local_to_value", "bb", "Compares a bank with a value"),
    (0x1D, "compare_local_to_ptr", "bd", "Compares a bank with a byte at an address"),
    (0x1E, "compare_ptr_to_local", "db", "Compares a byte at an address with a bank"),
    (0x1F, "compare_ptr_to_value", "db", "Compares a byte at an address with a value"),
    (0x20, "compare_ptr_to_ptr", "dd", "Compares bytes at two addresses"),
    (0x21, "compare_var_to_value", "vw", "Compares a variable with a value"),
    (0x22, "compare_var_to_var", "vv", "Compares two variables"),
    (0x23, "callnative", "d", "Calls native code"),
    (0x24, "gotonative", "d", "Jumps to native code"),
    (0x25, "special", "w", "Calls a special function"),
    (0x26, "specialvar", "vw", "Calls a special and stores the result"),
    (0x27, "waitstate", "", "Waits for a special to finish"),
    (0x28, "delay", "w", "Waits a number of frames"),
    (0x29, "setflag", "f", "Sets a flag"),
    (0x2A, "clearflag", "f", "Clears a flag"),
    (0x2B, "checkflag", "f", "Checks a flag"),
    (0x2C, "initclock", "vv", "Initializes the clock"),
    (0x2D, "dotimebasedevents", "", "Runs time-based events"),
    (0x2E, "gettime", "", "Loads the time into variables"),
    (0x2F, "playse", "w", "Plays a sound effect"),
    (0x30, "waitse", "", "Waits for the sound effect"),
    (0x31, "playfanfare", "w", "Plays a fanfare"),
    (0x32, "waitfanfare", "", "Waits for the fanfare"),
    (0x33, "playbgm", "wb", "Plays music"),
    (0x34, "savebgm", "w", "Saves the music for later"),
    (0x35, "fadedefaultbgm", "", "Fades to the map's music"),
    (0x36, "fadenewbgm", "w", "Fades to new music"),
    (0x37, "fadeoutbgm", "b", "Fades out the music"),
    (0x38, "fadeinbgm", "b", "Fades in the music"),
    (0x39, "warp", "bbbww", "Warps the player"),
    (0x3A, "warpsilent", "bbbww", "Warps without a sound"),
    (0x3B, "warpdoor", "bbbww", "Warps through a door"),
    (0x3C, "warphole", "bb", "Warps through a hole"),
    (0x3D, "warpteleport", "bbbww", "Warps with the teleport effect"),
    (0x3E, "setwarp", "bbbww", "Sets the warp destination"),
    (0x3F, "setdynamicwarp", "bbbww", "Sets the dynamic warp"),
    (0x40, "setdivewarp", "bbbww", "Sets the dive warp"),
    (0x41, "setholewarp", "bbbww", "Sets the hole warp"),
    (0x42, "getplayerxy", "vv", "Stores the player position"),
    (0x43, "getpartysize", "", "Stores the party size"),
    (0x44, "additem", "iw", "Gives items to the player"),
    (0x45, "removeitem", "iw", "Takes items from the player"),
    (0x46, "checkitemspace", "iw", "Checks bag space for items"),
    (0x47, "checkitem", "iw", "Checks if the player has items"),
    (0x48, "checkitemtype", "i", "Checks an item's pocket"),
    (0x49, "addpcitem", "iw", "Adds items to the PC"),
    (0x4A, "checkpcitem", "iw", "Checks items in the PC"),
    (0x4B, "adddecoration", "w", "Adds a decoration"),
    (0x4C, "removedecoration", "w", "Removes a decoration"),
    (0x4D, "checkdecor", "w", "Checks for a decoration"),
    (0x4E, "checkdecorspace", "w", "Checks decoration space"),
    (0x4F, "applymovement", "wP", "Applies a movement script"),
    (0x50, "applymovementat", "wPbb", "Applies a movement script on a map"),
    (0x51, "waitmovement", "w", "Waits for movement"),
    (0x52, "waitmovementat", "wbb", "Waits for movement on a map"),
    (0x53, "removeobject", "w", "Hides an object"),
    (0x54, "removeobjectat", "wbb", "Hides an object on a map"),
    (0x55, "addobject", "w", "Shows an object"),
    (0x56, "addobjectat", "wbb", "Shows an object on a map"),
    (0x57, "setobjectxy", "www", "Moves an object"),
    (0x58, "showobjectat", "wbb", "Makes an object visible"),
    (0x59, "hideobjectat", "wbb", "Makes an object invisible"),
    (0x5A, "faceplayer", "", "Turns the object toward the player"),
    (0x5B, "turnobject", "wb", "Turns an object"),
    (0x5C, "trainerbattle", "bwwPP", "Starts a trainer battle"),
    (0x5D, "dotrainerbattle", "", "Runs the prepared trainer battle"),
    (0x5E, "gotopostbattlescript", "", "Jumps to the post-battle script"),
    (0x5F, "gotobeatenscript", "", "Jumps to the beaten script"),
    (0x60, "checktrainerflag", "w", "Checks a trainer flag"),
    (0x61, "settrainerflag", "w", "Sets a trainer flag"),
    (0x62, "cleartrainerflag", "w", "Clears a trainer flag"),
    (0x63, "setobjectxyperm", "www", "Sets an object's permanent position"),
    (0x64, "copyobjectxytoperm", "w", "Stores an object's position"),
    (0x65, "setobjectmovementtype", "wb", "Sets an object's movement type"),
    (0x66, "waitmessage", "", "Waits for the message box"),
    (0x67, "message", "P", "Shows a message"),
    (0x68, "closemessage", "", "Closes the message box"),
    (0x69, "lockall", "", "Locks all objects"),
    (0x6A, "lock", "", "Locks the selected object"),
    (0x6B, "releaseall", "", "Releases all objects"),
    (0x6C, "release", "", "Releases the selected object"),
    (0x6D, "waitbuttonpress", "", "Waits for a button press"),
    (0x6E, "yesnobox", "bb", "Shows a yes/no box"),
    (0x6F, "multichoice", "bbbb", "Shows a multiple-choice menu"),
    (0x70, "multichoicedefault", "bbbbb", "Shows a menu with a default"),
    (0x71, "multichoicegrid", "bbbbb", "Shows a grid menu"),
    (0x72, "drawbox", "", "Draws a box"),
    (0x73, "erasebox", "bbbb", "Erases a box"),
    (0x74, "drawboxtext", "bbbb", "Draws box text"),
    (0x75, "showmonpic", "pbb", "Shows a pokemon picture"),
    (0x76, "hidemonpic", "", "Hides the pokemon picture"),
    (0x77, "showcontestpainting", "b", "Shows a contest painting"),
    (0x78, "braillemessage", "P", "Shows a braille message"),
    (0x79, "givemon", "pbiddb", "Gives a pokemon"),
    (0x7A, "giveegg", "p", "Gives an egg"),
    (0x7B, "setmonmove", "bbM", "Sets a party member's move"),
    (0x7C, "checkpartymove", "M", "Checks the party for a move"),
    (0x7D, "bufferspeciesname", "bp", "Buffers a species name"),
    (0x7E, "bufferleadmonspeciesname", "b", "Buffers the lead species name"),
    (0x7F, "bufferpartymonnick", "bv", "Buffers a party nickname"),
    (0x80, "bufferitemname", "bi", "Buffers an item name"),
    (0x81, "bufferdecorationname", "bw", "Buffers a decoration name"),
    (0x82, "buffermovename", "bM", "Buffers a move name"),
    (0x83, "buffernumberstring", "bv", "Buffers a number"),
    (0x84, "bufferstdstring", "bv", "Buffers a standard string"),
    (0x85, "bufferstring", "bP", "Buffers a string"),
    (0x86, "pokemart", "P", "Opens a mart"),
    (0x87, "pokemartdecoration", "P", "Opens a decoration mart"),
    (0x88, "pokemartdecoration2", "P", "Opens a decoration mart"),
    (0x89, "playslotmachine", "v", "Starts the slot machine"),
    (0x8A, "setberrytree", "bbb", "Plants a berry tree"),
    (0x8B, "choosecontestmon", "", "Chooses a contest pokemon"),
    (0x8C, "startcontest", "", "Starts a contest"),
    (0x8D, "showcontestresults", "", "Shows contest results"),
    (0x8E, "contestlinktransfer", "", "Starts a link contest"),
    (0x8F, "random", "w", "Stores a random number"),
    (0x90, "addmoney", "db", "Gives money"),
    (0x91, "removemoney", "db", "Takes money"),
    (0x92, "checkmoney", "db", "Checks money"),
    (0x93, "showmoneybox", "bbb", "Shows the money box"),
    (0x94, "hidemoneybox", "", "Hides the money box"),
    (0x95, "updatemoneybox", "bbb", "Updates the money box"),
    (0x96, "getpokenewsactive", "w", "Checks PokeNews"),
    (0x97, "fadescreen", "b", "Fades the screen"),
    (0x98, "fadescreenspeed", "bb", "Fades the screen at a speed"),
    (0x99, "setflashlevel", "w", "Sets the flash radius"),
    (0x9A, "animateflash", "b", "Animates the flash radius"),
    (0x9B, "messageautoscroll", "P", "Shows an auto-scrolling message"),
    (0x9C, "dofieldeffect", "w", "Runs a field effect"),
    (0x9D, "setfieldeffectargument", "bw", "Sets a field effect argument"),
    (0x9E, "waitfieldeffect", "w", "Waits for a field effect"),
    (0x9F, "setrespawn", "w", "Sets the respawn point"),
    (0xA0, "checkplayergender", "", "Stores the player gender"),
    (0xA1, "playmoncry", "pw", "Plays a pokemon cry"),
    (0xA2, "setmetatile", "wwww", "Changes a map metatile"),
    (0xA3, "resetweather", "", "Resets the weather"),
    (0xA4, "setweather", "w", "Sets the weather"),
    (0xA5, "doweather", "", "Applies the weather"),
    (0xA6, "setstepcallback", "b", "Sets a per-step callback"),
    (0xA7, "setmaplayoutindex", "w", "Sets the map layout"),
    (0xA8, "setobjectsubpriority", "wbbb", "Sets an object's subpriority"),
    (0xA9, "resetobjectsubpriority", "wbb", "Resets an object's subpriority"),
    (0xAA, "createvobject", "bbwwbb", "Creates a virtual object"),
    (0xAB, "turnvobject", "bb", "Turns a virtual object"),
    (0xAC, "opendoor", "ww", "Opens a door"),
    (0xAD, "closedoor", "ww", "Closes a door"),
    (0xAE, "waitdooranim", "", "Waits for the door animation"),
    (0xAF, "setdooropen", "ww", "Sets a door open"),
    (0xB0, "setdoorclosed", "ww", "Sets a door closed"),
    (0xB1, "addelevmenuitem", "bwww", "Adds an elevator menu item"),
    (0xB2, "showelevmenu", "", "Shows the elevator menu"),
    (0xB3, "checkcoins", "v", "Stores the coin count"),
    (0xB4, "addcoins", "w", "Gives coins"),
    (0xB5, "removecoins", "w", "Takes coins"),
    (0xB6, "setwildbattle", "pbi", "Prepares a wild battle"),
    (0xB7, "dowildbattle", "", "Starts the prepared wild battle"),
    (0xB8, "setvaddress", "d", "Sets the virtual base address"),
    (0xB9, "vgoto", "d", "Jumps to a virtual address"),
    (0xBA, "vcall", "d", "Calls a virtual address"),
    (0xBB, "vgoto_if", "bd", "Jumps to a virtual address conditionally"),
    (0xBC, "vcall_if", "bd", "Calls a virtual address conditionally"),
    (0xBD, "vmessage", "d", "Shows a message at a virtual address"),
    (0xBE, "vbuffermessage", "d", "Buffers a message at a virtual address"),
    (0xBF, "vbufferstring", "bd", "Buffers a string at a virtual address"),
    (0xC0, "showcoinsbox", "bb", "Shows the coins box"),
    (0xC1, "hidecoinsbox", "bb", "Hides the coins box"),
    (0xC2, "updatecoinsbox", "bb", "Updates the coins box"),
    (0xC3, "incrementgamestat", "b", "Increments a game stat"),
    (0xC4, "setescapewarp", "bbbww", "Sets the escape warp"),
    (0xC5, "waitmoncry", "", "Waits for the cry"),
    (0xC6, "bufferboxname", "bv", "Buffers a PC box name"),
    (0xC7, "textcolor", "b", "Sets the text color"),
    (0xC8, "loadhelp", "P", "Loads help text"),
    (0xC9, "unloadhelp", "", "Unloads help text"),
    (0xCA, "signmsg", "", "Uses the sign message frame"),
    (0xCB, "normalmsg", "", "Uses the normal message frame"),
    (0xCC, "comparehiddenvar", "bd", "Compares a hidden variable"),
    (0xCD, "setmoneventlegal", "v", "Marks a party pokemon event-legal"),
    (0xCE, "checkmoneventlegal", "v", "Checks a party pokemon is event-legal"),
    (0xCF, "trywondercardscript", "", "Runs the gift card's RAM script"),
    (0xD0, "setworldmapflag", "f", "Sets a world map flag"),
    (0xD1, "warpspinenter", "bbbww", "Warps with a spin"),
    (0xD2, "setmonmetlocation", "vb", "Sets a party pokemon's met location"),
    (0xD3, "moverotatingtileobjects", "w", "Moves rotating tiles"),
    (0xD4, "turnrotatingtileobjects", "", "Turns rotating tiles"),
    (0xD5, "initrotatingtilepuzzle", "w", "Starts the rotating tile puzzle"),
    (0xD6, "freerotatingtilepuzzle", "", "Ends the rotating tile puzzle"),
    (0xD7, "warpmossdeepgym", "bbbww", "Warps within the Mossdeep gym"),
    (0xD8, "selectapproachingtrainer", "", "Selects the approaching trainer"),
    (0xD9, "lockfortrainer", "", "Locks for a trainer"),
    (0xDA, "closebraillemessage", "", "Closes the braille message"),
    (0xDB, "messageinstant", "P", "Shows a message instantly"),
    (0xDC, "fadescreenswapbuffers", "b", "Fades the screen with swapped buffers"),
    (0xDD, "buffertrainerclassname", "bw", "Buffers a trainer class name"),
    (0xDE, "buffertrainername", "bw", "Buffers a trainer name"),
    (0xDF, "pokenavcall", "P", "Shows a PokeNav call"),
    (0xE0, "warpwhitefade", "bbbww", "Warps with a white fade"),
    (0xE1, "buffercontestname", "bv", "Buffers a contest name"),
    (0xE2, "bufferitemnameplural", "biv", "Buffers a plural item name"),
];

const BUILTIN_CONDITIONS: &[(u8, &str)] = &[
    (0x00, "<"),
    (0x01, "="),
    (0x02, ">"),
    (0x03, "<="),
    (0x04, ">="),
    (0x05, "!="),
];

const BUILTIN_STD_SCRIPTS: &[(u8, &str)] = &[
    (0x00, "STD_OBTAIN_ITEM"),
    (0x01, "STD_FIND_ITEM"),
    (0x02, "STD_MSG_BOX_NPC"),
    (0x03, "STD_MSG_BOX_SIGN"),
    (0x04, "STD_MSG_BOX_DEFAULT"),
    (0x05, "STD_MSG_BOX_YES_NO"),
    (0x06, "STD_MSG_BOX_AUTOCLOSE"),
    (0x07, "STD_OBTAIN_DECORATION"),
];

const BUILTIN_VARIABLES: &[(u16, &str)] = &[
    (0x8000, "VAR_0x8000"),
    (0x8001, "VAR_0x8001"),
    (0x8002, "VAR_0x8002"),
    (0x8003, "VAR_0x8003"),
    (0x8004, "VAR_0x8004"),
    (0x8005, "VAR_0x8005"),
    (0x8006, "VAR_0x8006"),
    (0x800C, "VAR_FACING"),
    (0x800D, "VAR_RESULT"),
    (0x800E, "VAR_ITEM_ID"),
    (0x800F, "VAR_LAST_TALKED"),
];

const BUILTIN_PLACEHOLDERS: &[(u8, &str)] = &[
    (0x01, "{PLAYER}"),
    (0x02, "{STR_VAR_1}"),
    (0x03, "{STR_VAR_2}"),
    (0x04, "{STR_VAR_3}"),
    (0x05, "{KUN}"),
    (0x06, "{RIVAL}"),
];

#[derive(Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(untagged)]
enum RawKey {
    Int(u64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Document {
    commands: BTreeMap<RawKey, CommandDef>,
    conditions: BTreeMap<RawKey, String>,
    std_scripts: BTreeMap<RawKey, String>,
    variables: BTreeMap<RawKey, String>,
    flags: BTreeMap<RawKey, String>,
    specials: BTreeMap<RawKey, String>,
    placeholders: BTreeMap<RawKey, String>,
}

fn convert_keys<K: TryFrom<i64>, V>(
    table: &'static str,
    raw: BTreeMap<RawKey, V>,
    into: &mut BTreeMap<K, V>,
) -> Result<(), SymbolError>
where
    K: Ord,
{
    for (key, value) in raw {
        let parsed = match &key {
            RawKey::Int(v) => i64::try_from(*v).ok(),
            RawKey::Text(s) => parse_number(s).ok(),
        };
        let id = parsed.and_then(|v| K::try_from(v).ok()).ok_or_else(|| {
            SymbolError::InvalidKey {
                table,
                key: match key {
                    RawKey::Int(v) => v.to_string(),
                    RawKey::Text(s) => s,
                },
            }
        })?;
        into.insert(id, value);
    }
    Ok(())
}

fn table_from<K: Ord + Copy>(entries: &[(K, &str)]) -> BTreeMap<K, String> {
    entries.iter().map(|&(k, v)| (k, v.to_string())).collect()
}

/// Opcode formats plus the numeric-id to name tables used when rendering.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    pub commands: BTreeMap<u8, CommandDef>,
    pub conditions: BTreeMap<u8, String>,
    pub std_scripts: BTreeMap<u8, String>,
    pub variables: BTreeMap<u16, String>,
    pub flags: BTreeMap<u16, String>,
    pub specials: BTreeMap<u16, String>,
    pub placeholders: BTreeMap<u8, String>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SymbolTable {
    pub fn builtin() -> Self {
        let commands = BUILTIN_COMMANDS
            .iter()
            .map(|&(op, name, args, desc)| {
                (
                    op,
                    CommandDef {
                        name: name.to_string(),
                        args: args.to_string(),
                        desc: desc.to_string(),
                    },
                )
            })
            .collect();
        Self {
            commands,
            conditions: table_from(BUILTIN_CONDITIONS),
            std_scripts: table_from(BUILTIN_STD_SCRIPTS),
            variables: table_from(BUILTIN_VARIABLES),
            flags: BTreeMap::new(),
            specials: BTreeMap::new(),
            placeholders: table_from(BUILTIN_PLACEHOLDERS),
        }
    }

    /// Table with no commands at all; every opcode decodes as `db`.
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
            conditions: BTreeMap::new(),
            std_scripts: BTreeMap::new(),
            variables: BTreeMap::new(),
            flags: BTreeMap::new(),
            specials: BTreeMap::new(),
            placeholders: BTreeMap::new(),
        }
    }

    fn overlay(&mut self, doc: Document) -> Result<(), SymbolError> {
        let mut commands = BTreeMap::new();
        convert_keys("commands", doc.commands, &mut commands)?;
        for (&opcode, cmd) in &commands {
            if let Some(kind) = cmd.args.chars().find(|&c| ArgKind::from_char(c).is_none()) {
                return Err(SymbolError::InvalidArgFormat {
                    opcode,
                    name: cmd.name.clone(),
                    kind,
                });
            }
        }
        self.commands.extend(commands);
        convert_keys("conditions", doc.conditions, &mut self.conditions)?;
        convert_keys("std_scripts", doc.std_scripts, &mut self.std_scripts)?;
        convert_keys("variables", doc.variables, &mut self.variables)?;
        convert_keys("flags", doc.flags, &mut self.flags)?;
        convert_keys("specials", doc.specials, &mut self.specials)?;
        convert_keys("placeholders", doc.placeholders, &mut self.placeholders)?;
        debug!(
            "symbols: {} commands, {} flags, {} vars, {} specials",
            self.commands.len(),
            self.flags.len(),
            self.variables.len(),
            self.specials.len()
        );
        Ok(())
    }

    pub fn from_yaml_str(src: &str) -> Result<Self, SymbolError> {
        let mut table = Self::builtin();
        table.overlay(serde_yaml::from_str(src)?)?;
        Ok(table)
    }

    pub fn from_json_str(src: &str) -> Result<Self, SymbolError> {
        let mut table = Self::builtin();
        table.overlay(serde_json::from_str(src)?)?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, SymbolError> {
        let src = fs::read_to_string(path).map_err(|source| SymbolError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&src)
        } else {
            Self::from_yaml_str(&src)
        }
    }

    pub fn command(&self, opcode: u8) -> Option<&CommandDef> {
        self.commands.get(&opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_control_flow_commands() {
        let table = SymbolTable::builtin();
        assert_eq!(table.command(0x02).unwrap().name, "end");
        assert_eq!(table.command(0x05).unwrap().arg_kinds(), vec![ArgKind::Pointer]);
        assert_eq!(
            table.command(0x06).unwrap().arg_kinds(),
            vec![ArgKind::Byte, ArgKind::Pointer]
        );
        assert_eq!(table.command(0xB8).unwrap().name, "setvaddress");
        assert_eq!(table.command(0xBD).unwrap().args, "d");
        assert!(table.command(0xE3).is_none());
        for (op, cmd) in &table.commands {
            assert!(
                cmd.args.chars().all(|c| ArgKind::from_char(c).is_some()),
                "opcode {op:#04x}"
            );
        }
    }

    #[test]
    fn yaml_overlays_builtin() {
        let table = SymbolTable::from_yaml_str(
            r#"
commands:
  0x29: { name: setflag, args: f, desc: "Raises a flag" }
  0xF0: { name: custom, args: bw, desc: "Custom" }
flags:
  0x820: FLAG_BADGE01_GET
  "0x0861": FLAG_SYS_POKEDEX_GET
specials:
  0x0000: HealPlayerParty
"#,
        )
        .unwrap();
        assert_eq!(table.command(0x29).unwrap().desc, "Raises a flag");
        assert_eq!(table.command(0xF0).unwrap().args, "bw");
        assert_eq!(table.command(0x05).unwrap().name, "goto");
        assert_eq!(table.flags[&0x820], "FLAG_BADGE01_GET");
        assert_eq!(table.flags[&0x861], "FLAG_SYS_POKEDEX_GET");
        assert_eq!(table.specials[&0], "HealPlayerParty");
        assert_eq!(table.conditions[&1], "=");
    }

    #[test]
    fn json_keys_are_hex_strings() {
        let table = SymbolTable::from_json_str(
            r#"{"variables": {"0x4001": "VAR_TEMP_1"}, "placeholders": {"1": "{NAME}"}}"#,
        )
        .unwrap();
        assert_eq!(table.variables[&0x4001], "VAR_TEMP_1");
        assert_eq!(table.placeholders[&1], "{NAME}");
    }

    #[test]
    fn rejects_bad_keys_and_formats() {
        let err = SymbolTable::from_yaml_str("flags:\n  nope: FLAG_X\n").unwrap_err();
        assert!(matches!(err, SymbolError::InvalidKey { table: "flags", .. }));
        let err = SymbolTable::from_yaml_str("conditions:\n  0x100: X\n").unwrap_err();
        assert!(matches!(err, SymbolError::InvalidKey { .. }));
        let err =
            SymbolTable::from_yaml_str("commands:\n  0x01: { name: x, args: bz, desc: y }\n")
                .unwrap_err();
        assert!(matches!(err, SymbolError::InvalidArgFormat { kind: 'z', .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.yaml");
        fs::write(&path, "std_scripts:\n  0x09: STD_CUSTOM\n").unwrap();
        let table = SymbolTable::load(&path).unwrap();
        assert_eq!(table.std_scripts[&9], "STD_CUSTOM");
    }
}
